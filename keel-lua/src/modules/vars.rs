//! `vars` module: explicit configuration variables for definitions
//!
//! Definitions never read the process environment. Whatever the caller puts
//! in [`LoaderConfig::vars`](crate::LoaderConfig) is what `vars.get` sees, so
//! the same definition loads identically in the CLI, the server and tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::module::KeelModule;
use mlua::prelude::*;

/// Source of definition variables
///
/// Implementations must be Send + Sync to work with Lua's threading model.
pub trait VarProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    /// All variable names, in a stable order
    fn keys(&self) -> Vec<String>;
}

/// [`VarProvider`] over an owned map
#[derive(Debug, Clone, Default)]
pub struct MapVarProvider {
    vars: BTreeMap<String, String>,
}

impl MapVarProvider {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }
}

impl VarProvider for MapVarProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }
}

pub struct VarsModule<V: VarProvider> {
    provider: Arc<V>,
}

impl<V: VarProvider> VarsModule<V> {
    pub fn new(provider: V) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl<V: VarProvider + 'static> KeelModule for VarsModule<V> {
    fn id(&self) -> &'static str {
        "vars"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let vars_table = lua.create_table()?;

        // vars.get(name, default?)
        {
            let provider = self.provider.clone();
            vars_table.set(
                "get",
                lua.create_function(move |_, (name, default): (String, Option<String>)| {
                    Ok(provider.get(&name).or(default))
                })?,
            )?;
        }

        // vars.require(name) errors when the variable is missing
        {
            let provider = self.provider.clone();
            vars_table.set(
                "require",
                lua.create_function(move |_, name: String| {
                    provider.get(&name).ok_or_else(|| {
                        LuaError::RuntimeError(format!(
                            "Required variable '{}' is not set",
                            name
                        ))
                    })
                })?,
            )?;
        }

        {
            let provider = self.provider.clone();
            vars_table.set(
                "has",
                lua.create_function(move |_, name: String| Ok(provider.get(&name).is_some()))?,
            )?;
        }

        {
            let provider = self.provider.clone();
            vars_table.set(
                "all",
                lua.create_function(move |lua, ()| {
                    let table = lua.create_table()?;
                    for key in provider.keys() {
                        if let Some(value) = provider.get(&key) {
                            table.set(key.as_str(), value.as_str())?;
                        }
                    }
                    Ok(table)
                })?,
            )?;
        }

        {
            let provider = self.provider.clone();
            vars_table.set(
                "keys",
                lua.create_function(move |lua, ()| {
                    let table = lua.create_table()?;
                    for (i, key) in provider.keys().iter().enumerate() {
                        table.set(i + 1, key.as_str())?;
                    }
                    Ok(table)
                })?,
            )?;
        }

        lua.globals().set(self.id(), vars_table)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Definition variables
---Values come from the loader configuration (KEEL_VAR_* or --var), never from the raw process environment
---@class vars
vars = {}

---Get a variable with an optional default value
---@param name string Variable name
---@param default? string Value returned when the variable is not set
---@return string? value
---
---@usage
---local registry = vars.get("REGISTRY", "docker.io")
function vars.get(name, default) end

---Get a required variable, failing the load when it is missing
---@param name string Variable name
---@return string value
---
---@usage
---local repo = vars.require("GITOPS_REPO")
function vars.require(name) end

---Check whether a variable is set
---@param name string Variable name
---@return boolean exists
function vars.has(name) end

---All variables as a table
---@return table<string, string> vars
function vars.all() end

---All variable names
---@return string[] keys
function vars.keys() end
"#
        .to_string()
    }

    fn description(&self) -> &'static str {
        "Configuration variables for pipeline definitions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua_with_vars(pairs: &[(&str, &str)]) -> Lua {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let lua = Lua::new();
        VarsModule::new(MapVarProvider::new(vars))
            .register(&lua)
            .unwrap();
        lua
    }

    #[test]
    fn test_vars_get() {
        let lua = lua_with_vars(&[("REGISTRY", "docker.io")]);

        let result: String = lua.load(r#"return vars.get("REGISTRY")"#).eval().unwrap();
        assert_eq!(result, "docker.io");

        let result: String = lua
            .load(r#"return vars.get("MISSING", "fallback")"#)
            .eval()
            .unwrap();
        assert_eq!(result, "fallback");

        let result: Option<String> = lua.load(r#"return vars.get("MISSING")"#).eval().unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_vars_require() {
        let lua = lua_with_vars(&[("GITOPS_REPO", "git@example.com:ops.git")]);

        let result: String = lua
            .load(r#"return vars.require("GITOPS_REPO")"#)
            .eval()
            .unwrap();
        assert_eq!(result, "git@example.com:ops.git");

        let result: LuaResult<String> = lua.load(r#"return vars.require("MISSING")"#).eval();
        assert!(result.unwrap_err().to_string().contains("Required variable"));
    }

    #[test]
    fn test_vars_has_all_keys() {
        let lua = lua_with_vars(&[("A", "1"), ("B", "2")]);

        let has: bool = lua.load(r#"return vars.has("A")"#).eval().unwrap();
        assert!(has);

        let (a, b): (String, String) = lua
            .load("local all = vars.all() return all.A, all.B")
            .eval()
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("1", "2"));

        let first: String = lua.load("return vars.keys()[1]").eval().unwrap();
        assert_eq!(first, "A");
    }

    #[test]
    fn test_stubs_generation() {
        let stubs = VarsModule::new(MapVarProvider::default()).stubs();
        assert!(stubs.contains("---@meta"));
        assert!(stubs.contains("function vars.require"));
    }
}
