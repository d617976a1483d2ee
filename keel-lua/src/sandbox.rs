//! Lua sandbox creation
//!
//! Definitions are evaluated in a sandbox with no filesystem, network or
//! process access and no way to load external code.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};

use crate::module::ModuleRegistry;

/// Create a restricted Lua sandbox and install `registry` into it
///
/// Only `table`, `string` and `math` are loaded. `require`, `dofile`,
/// `loadfile` and `load` are removed.
pub fn create_sandbox(registry: &ModuleRegistry) -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;

    let globals = lua.globals();
    for name in ["require", "dofile", "loadfile", "load"] {
        globals.set(name, mlua::Nil)?;
    }

    registry.install(&lua)?;

    Ok(lua)
}
