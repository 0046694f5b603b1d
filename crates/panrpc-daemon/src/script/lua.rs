//! Lua 5.4 backend (`mlua`).
//!
//! Each registered module is a global table (`panapi`, `stats`) holding
//! `Log(...)`, `Now()` and one stub per entry point. Scripts override the
//! stubs with `function panapi.Path(local, remote) ... end`.

use std::time::{SystemTime, UNIX_EPOCH};

use mlua::{Lua, MultiValue, Table, Value};

use panrpc_core::{PanRpcError, Result, ScriptTable, ScriptValue};

use super::runtime::{NotImplemented, ScriptRuntime};

/// Tracing target for script `Log(...)` output.
pub const SCRIPT_LOG_TARGET: &str = "panrpc::script";

/// Nesting limit when converting tables out of the VM. Cyclic tables hit it.
const MAX_TABLE_DEPTH: usize = 32;

pub struct LuaRuntime {
    lua: Lua,
    not_implemented: NotImplemented,
}

impl Default for LuaRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaRuntime {
    pub fn new() -> Self {
        Self {
            lua: Lua::new(),
            not_implemented: NotImplemented::new(),
        }
    }

    /// Shared "not implemented" tracker (also handed to the stubs).
    pub fn not_implemented(&self) -> &NotImplemented {
        &self.not_implemented
    }

    fn lookup(&self, module: &str, function: &str) -> Result<Option<mlua::Function>> {
        let Value::Table(m) = self.lua.globals().get::<Value>(module).map_err(lua_err)? else {
            return Ok(None);
        };
        match m.get::<Value>(function).map_err(lua_err)? {
            Value::Function(f) => Ok(Some(f)),
            Value::Nil => Ok(None),
            other => Err(PanRpcError::Policy(format!(
                "{module}.{function} is a {}, not a function",
                other.type_name()
            ))),
        }
    }
}

impl ScriptRuntime for LuaRuntime {
    fn register_module(&mut self, module: &str, entry_points: &[&str]) -> Result<()> {
        let table = self.lua.create_table().map_err(lua_err)?;

        let log_module = module.to_string();
        let log = self
            .lua
            .create_function(move |_, args: MultiValue| {
                let line = args.iter().map(display).collect::<Vec<_>>().join(" ");
                tracing::info!(target: SCRIPT_LOG_TARGET, module = %log_module, "{line}");
                Ok(())
            })
            .map_err(lua_err)?;
        table.set("Log", log).map_err(lua_err)?;

        let now = self
            .lua
            .create_function(|_, ()| Ok(unix_micros_now()))
            .map_err(lua_err)?;
        table.set("Now", now).map_err(lua_err)?;

        for ep in entry_points {
            let tracker = self.not_implemented.clone();
            let (m, f) = (module.to_string(), ep.to_string());
            let stub = self
                .lua
                .create_function(move |_, _: MultiValue| {
                    tracker.report(&m, &f);
                    Ok(())
                })
                .map_err(lua_err)?;
            table.set(*ep, stub).map_err(lua_err)?;
        }

        self.lua.globals().set(module, table).map_err(lua_err)
    }

    fn load_source(&mut self, name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|e| PanRpcError::Config(format!("load script {name} failed: {e}")))
    }

    fn call_named(
        &mut self,
        module: &str,
        function: &str,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>> {
        let Some(f) = self.lookup(module, function)? else {
            self.not_implemented.report(module, function);
            return Ok(Vec::new());
        };

        let args = args
            .iter()
            .map(|a| to_lua(&self.lua, a))
            .collect::<Result<Vec<_>>>()?;

        let results: MultiValue = f
            .call(MultiValue::from_vec(args))
            .map_err(|e| PanRpcError::Policy(format!("{module}.{function}: {e}")))?;

        results
            .into_iter()
            .map(|v| from_lua(&v, 0))
            .collect::<Result<Vec<_>>>()
    }
}

fn to_lua(lua: &Lua, v: &ScriptValue) -> Result<Value> {
    let out = match v {
        ScriptValue::Nil => Value::Nil,
        ScriptValue::Boolean(b) => Value::Boolean(*b),
        ScriptValue::Integer(i) => Value::Integer(*i),
        ScriptValue::Number(n) => Value::Number(*n),
        ScriptValue::String(s) => Value::String(lua.create_string(s).map_err(lua_err)?),
        ScriptValue::Table(t) => {
            let table = lua
                .create_table_with_capacity(t.sequence.len(), t.fields.len())
                .map_err(lua_err)?;
            for (i, item) in t.sequence.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?).map_err(lua_err)?;
            }
            for (k, item) in &t.fields {
                table.raw_set(k.as_str(), to_lua(lua, item)?).map_err(lua_err)?;
            }
            Value::Table(table)
        }
    };
    Ok(out)
}

fn from_lua(v: &Value, depth: usize) -> Result<ScriptValue> {
    let out = match v {
        Value::Nil => ScriptValue::Nil,
        Value::Boolean(b) => ScriptValue::Boolean(*b),
        Value::Integer(i) => ScriptValue::Integer(*i),
        Value::Number(n) => ScriptValue::Number(*n),
        Value::String(s) => ScriptValue::String(s.to_string_lossy().to_string()),
        Value::Table(t) => {
            if depth >= MAX_TABLE_DEPTH {
                return Err(PanRpcError::Policy(format!(
                    "table nesting exceeds {MAX_TABLE_DEPTH} levels (cyclic table?)"
                )));
            }
            ScriptValue::Table(table_from_lua(t, depth + 1)?)
        }
        other => {
            return Err(PanRpcError::Policy(format!(
                "unsupported {} value returned from script",
                other.type_name()
            )))
        }
    };
    Ok(out)
}

fn table_from_lua(t: &Table, depth: usize) -> Result<ScriptTable> {
    let len = t.raw_len();
    let mut out = ScriptTable::new();
    for i in 1..=len {
        out.sequence
            .push(from_lua(&t.raw_get::<Value>(i).map_err(lua_err)?, depth)?);
    }

    for pair in t.pairs::<Value, Value>() {
        let (k, v) = pair.map_err(lua_err)?;
        let key = match &k {
            Value::Integer(i) if usize::try_from(*i).is_ok_and(|i| (1..=len).contains(&i)) => {
                continue
            }
            Value::Integer(i) => i.to_string(),
            Value::String(s) => s.to_string_lossy().to_string(),
            other => {
                return Err(PanRpcError::Policy(format!(
                    "unsupported {} table key",
                    other.type_name()
                )))
            }
        };
        out.set(key, from_lua(&v, depth)?);
    }
    Ok(out)
}

/// Text form of one `Log` argument.
fn display(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}

fn unix_micros_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn lua_err(e: mlua::Error) -> PanRpcError {
    PanRpcError::Internal(format!("lua: {e}"))
}
