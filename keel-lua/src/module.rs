use mlua::prelude::*;

/// A global table offered to pipeline definitions.
///
/// A module owns exactly one global, named by [`KeelModule::id`], and must not
/// reach outside the sandbox: evaluating a definition is a pure parse.
///
/// ```rust
/// use keel_lua::{KeelModule, ModuleRegistry};
/// use mlua::prelude::*;
///
/// struct Extras;
///
/// impl KeelModule for Extras {
///     fn id(&self) -> &'static str {
///         "extras"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         let table = lua.create_table()?;
///         table.set("double", lua.create_function(|_, n: i64| Ok(n * 2))?)?;
///         lua.globals().set(self.id(), table)
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\nextras = {}\n".to_string()
///     }
/// }
///
/// let registry = ModuleRegistry::new().with(Extras);
/// assert_eq!(registry.globals(), vec!["extras"]);
/// ```
pub trait KeelModule: Send + Sync {
    /// Global name in Lua; unique within a registry
    fn id(&self) -> &'static str;

    /// One line shown next to generated stub files
    fn description(&self) -> &'static str {
        ""
    }

    /// Installs the module's table as the global `id()`
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// LuaLS definition file, starting with `---@meta`
    fn stubs(&self) -> String;
}

/// Modules installed into a definition sandbox, in registration order
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn KeelModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable [`ModuleRegistry::register`]
    pub fn with<M: KeelModule + 'static>(mut self, module: M) -> Self {
        self.register(module);
        self
    }

    /// # Panics
    /// Panics if a module with the same id is already registered
    pub fn register<M: KeelModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.get(id).is_some() {
            panic!("module '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    pub fn get(&self, id: &str) -> Option<&dyn KeelModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    pub fn modules(&self) -> &[Box<dyn KeelModule>] {
        &self.modules
    }

    /// Global names the modules define, for editor configuration
    pub fn globals(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    /// Installs every module into `lua`, stopping at the first failure
    pub fn install(&self, lua: &Lua) -> LuaResult<()> {
        self.modules.iter().try_for_each(|m| m.register(lua))
    }

    /// All stubs in one file
    pub fn generate_stubs(&self) -> String {
        self.modules
            .iter()
            .map(|m| m.stubs())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant;

    impl KeelModule for Constant {
        fn id(&self) -> &'static str {
            "constant"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("answer", 42)?;
            lua.globals().set(self.id(), table)
        }

        fn stubs(&self) -> String {
            "---@meta\nconstant = {}".to_string()
        }
    }

    struct Other;

    impl KeelModule for Other {
        fn id(&self) -> &'static str {
            "other"
        }

        fn description(&self) -> &'static str {
            "second module"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            lua.globals().set(self.id(), lua.create_table()?)
        }

        fn stubs(&self) -> String {
            "---@meta\nother = {}".to_string()
        }
    }

    #[test]
    fn test_install_exposes_globals() {
        let registry = ModuleRegistry::new().with(Constant).with(Other);
        assert_eq!(registry.globals(), vec!["constant", "other"]);
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.get("other").map(|m| m.description()), Some("second module"));

        let lua = Lua::new();
        registry.install(&lua).unwrap();
        let answer: i32 = lua.load("return constant.answer").eval().unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_module_panics() {
        ModuleRegistry::new().with(Constant).with(Constant);
    }

    #[test]
    fn test_combined_stubs_keep_order() {
        let stubs = ModuleRegistry::new().with(Constant).with(Other).generate_stubs();
        let constant = stubs.find("constant = {}").unwrap();
        let other = stubs.find("other = {}").unwrap();
        assert!(constant < other);
    }
}
