//! `pipeline` module: the definition DSL
//!
//! Every helper returns a plain table; the parser reads tables, not helper
//! calls, so `pipeline.step{...}` and a literal `{...}` are equivalent.

use crate::module::KeelModule;
use mlua::prelude::*;
use mlua::{Table, Value};

pub struct PipelineModule;

impl KeelModule for PipelineModule {
    fn id(&self) -> &'static str {
        "pipeline"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let pipeline = lua.create_table()?;

        // pipeline.define(definition) returns the table as-is
        pipeline.set(
            "define",
            lua.create_function(|_, definition: Table| Ok(definition))?,
        )?;

        pipeline.set(
            "builder",
            lua.create_function(|lua, ()| create_pipeline_builder(lua))?,
        )?;

        pipeline.set("step", lua.create_function(|_, step: Table| Ok(step))?)?;

        // pipeline.credential(name, { description = ... })
        pipeline.set(
            "credential",
            lua.create_function(|lua, (name, opts): (String, Option<Table>)| {
                let credential = lua.create_table()?;
                credential.set("name", name)?;
                if let Some(opts) = opts {
                    credential.set("description", opts.get::<Value>("description")?)?;
                }
                Ok(credential)
            })?,
        )?;

        // pipeline.environment(pattern, { name, namespace, manifest, image_tag })
        pipeline.set(
            "environment",
            lua.create_function(|_, (pattern, binding): (String, Table)| {
                binding.set("pattern", pattern)?;
                Ok(binding)
            })?,
        )?;

        // pipeline.retry(max, delay_secs?, backoff?)
        pipeline.set(
            "retry",
            lua.create_function(
                |lua, (max, delay, backoff): (i64, Option<f64>, Option<String>)| {
                    let retry = lua.create_table()?;
                    retry.set("max", max)?;
                    retry.set("delay", delay)?;
                    retry.set("backoff", backoff)?;
                    Ok(retry)
                },
            )?,
        )?;

        // pipeline.mail(recipients, { on = {...} })
        pipeline.set(
            "mail",
            lua.create_function(|lua, (recipients, opts): (Value, Option<Table>)| {
                let target = notify_target(lua, "mail", opts)?;
                let list = match recipients {
                    Value::String(s) => {
                        let list = lua.create_table()?;
                        list.set(1, s)?;
                        list
                    }
                    Value::Table(t) => t,
                    _ => {
                        return Err(LuaError::RuntimeError(
                            "pipeline.mail expects a recipient or a list of recipients"
                                .to_string(),
                        ));
                    }
                };
                target.set("recipients", list)?;
                Ok(target)
            })?,
        )?;

        pipeline.set(
            "webhook",
            lua.create_function(|lua, (url, opts): (String, Option<Table>)| {
                let target = notify_target(lua, "webhook", opts)?;
                target.set("url", url)?;
                Ok(target)
            })?,
        )?;

        pipeline.set(
            "log",
            lua.create_function(|lua, opts: Option<Table>| notify_target(lua, "log", opts))?,
        )?;

        lua.globals().set(self.id(), pipeline)?;
        Ok(())
    }

    fn stubs(&self) -> String {
        r#"---@meta

---Pipeline definition DSL
---@class pipeline
pipeline = {}

---@alias keel.Capability
---| "build"
---| "image.build"
---| "image.push"
---| "scan"
---| "analysis.run"
---| "analysis.gate"
---| "artifact.publish"
---| "gitops.update"
---| "reconciler.sync"
---| "reconciler.wait_healthy"
---| "cluster.apply"
---| "cluster.rollout_status"
---| "cluster.get_pods"
---| "shell"

---@class keel.Retry
---@field max integer Retries after the first attempt
---@field delay? number Seconds between attempts
---@field backoff? "fixed"|"exponential"
---@field factor? number Exponential growth factor
---@field max_delay? number Upper bound on the delay in seconds

---@class keel.When
---@field branch? string Branch glob
---@field branches? string[] Branch globs
---@field environment? string Environment name
---@field environments? string[] Environment names
---@field enabled? boolean

---@class keel.Step
---@field name string Unique step name
---@field uses keel.Capability Capability to invoke
---@field with? table<string, string|number|boolean> Capability parameters, `${...}` templates allowed
---@field credentials? string[] Credentials acquired for each attempt
---@field needs? string[] Earlier steps whose outputs are consumed
---@field outputs? string[] Outputs other steps may reference
---@field retry? integer|keel.Retry
---@field timeout? number Seconds per attempt
---@field continue_on_failure? boolean Record failures as warnings and keep going
---@field blocking? boolean `false` is the same as `continue_on_failure = true`
---@field when? boolean|keel.When

---@class keel.Environment
---@field pattern? string Branch glob
---@field name string
---@field namespace string
---@field manifest string
---@field image_tag? string Image tag template

---@class keel.NotifyTarget
---@field type "mail"|"webhook"|"log"
---@field on? ("succeeded"|"failed"|"unstable"|"aborted")[]

---@class keel.Definition
---@field name string
---@field description? string
---@field credentials? (string|table)[]
---@field environments? keel.Environment[] Ordered, first match wins
---@field fallback? keel.Environment Used when no rule matches
---@field notify? keel.NotifyTarget[]
---@field steps keel.Step[]
---@field rollback? keel.Step[] Run best-effort after a blocking failure

---Return the definition table unchanged
---@param definition keel.Definition
---@return keel.Definition
function pipeline.define(definition) end

---Declare a step
---@param step keel.Step
---@return keel.Step
function pipeline.step(step) end

---Declare a credential
---@param name string
---@param opts? { description?: string }
---@return table
function pipeline.credential(name, opts) end

---Bind a branch pattern to a deployment target
---@param pattern string Branch glob, e.g. "main" or "feature/*"
---@param binding keel.Environment
---@return keel.Environment
function pipeline.environment(pattern, binding) end

---Retry policy
---@param max integer Retries after the first attempt
---@param delay? number Seconds between attempts
---@param backoff? "fixed"|"exponential"
---@return keel.Retry
function pipeline.retry(max, delay, backoff) end

---Mail notification target
---@param recipients string|string[]
---@param opts? { on?: string[] }
---@return keel.NotifyTarget
function pipeline.mail(recipients, opts) end

---Webhook notification target
---@param url string
---@param opts? { on?: string[] }
---@return keel.NotifyTarget
function pipeline.webhook(url, opts) end

---Log notification target
---@param opts? { on?: string[] }
---@return keel.NotifyTarget
function pipeline.log(opts) end

---@class keel.Builder
local Builder = {}

---Start a fluent definition
---@return keel.Builder
function pipeline.builder() end

---@param name string
---@return keel.Builder
function Builder:name(name) end

---@param description string
---@return keel.Builder
function Builder:description(description) end

---@param credential string|table
---@return keel.Builder
function Builder:credential(credential) end

---@param binding keel.Environment
---@return keel.Builder
function Builder:environment(binding) end

---@param binding keel.Environment
---@return keel.Builder
function Builder:fallback(binding) end

---@param target keel.NotifyTarget
---@return keel.Builder
function Builder:notify(target) end

---@param step keel.Step
---@return keel.Builder
function Builder:step(step) end

---@param step keel.Step
---@return keel.Builder
function Builder:rollback(step) end

---@return keel.Definition
function Builder:build() end
"#
        .to_string()
    }

    fn description(&self) -> &'static str {
        "Declarative pipeline definition helpers"
    }
}

fn notify_target(lua: &Lua, kind: &str, opts: Option<Table>) -> LuaResult<Table> {
    let target = lua.create_table()?;
    target.set("type", kind)?;
    if let Some(opts) = opts {
        target.set("on", opts.get::<Value>("on")?)?;
    }
    Ok(target)
}

/// Append `value` to the array stored under `key`, creating it on first use
fn push_to(lua: &Lua, builder: &Table, key: &str, value: Value) -> LuaResult<()> {
    let list: Table = match builder.get::<Value>(key)? {
        Value::Table(t) => t,
        _ => {
            let t = lua.create_table()?;
            builder.set(key, t.clone())?;
            t
        }
    };
    list.push(value)
}

/// Create a pipeline builder instance with fluent API methods
fn create_pipeline_builder(lua: &Lua) -> LuaResult<Table> {
    let builder = lua.create_table()?;
    let metatable = lua.create_table()?;

    metatable.set(
        "name",
        lua.create_function(|_, (builder, name): (Table, String)| {
            builder.set("_name", name)?;
            Ok(builder)
        })?,
    )?;

    metatable.set(
        "description",
        lua.create_function(|_, (builder, desc): (Table, String)| {
            builder.set("_description", desc)?;
            Ok(builder)
        })?,
    )?;

    metatable.set(
        "fallback",
        lua.create_function(|_, (builder, binding): (Table, Table)| {
            builder.set("_fallback", binding)?;
            Ok(builder)
        })?,
    )?;

    for (method, key) in [
        ("credential", "_credentials"),
        ("environment", "_environments"),
        ("notify", "_notify"),
        ("step", "_steps"),
        ("rollback", "_rollback"),
    ] {
        metatable.set(
            method,
            lua.create_function(move |lua, (builder, value): (Table, Value)| {
                push_to(lua, &builder, key, value)?;
                Ok(builder)
            })?,
        )?;
    }

    // build() converts builder state into a definition table
    metatable.set(
        "build",
        lua.create_function(|lua, builder: Table| {
            let definition = lua.create_table()?;
            for (from, to) in [
                ("_name", "name"),
                ("_description", "description"),
                ("_credentials", "credentials"),
                ("_environments", "environments"),
                ("_fallback", "fallback"),
                ("_notify", "notify"),
                ("_steps", "steps"),
                ("_rollback", "rollback"),
            ] {
                definition.set(to, builder.get::<Value>(from)?)?;
            }
            Ok(definition)
        })?,
    )?;

    // Set __index to the metatable itself so methods are accessible
    metatable.set("__index", metatable.clone())?;
    builder.set_metatable(Some(metatable))?;

    Ok(builder)
}
