//! The `mcp` and `console` objects a script sees.

use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::function::{Opt, Rest};
use rquickjs::{Ctx, Exception, Function, Object, Value};

use crate::bridge::HostBridge;

const CONSOLE_METHODS: [(&str, &str); 5] = [
    ("log", "info"),
    ("info", "info"),
    ("warn", "warn"),
    ("error", "error"),
    ("debug", "debug"),
];

pub fn install_host_objects<'js>(ctx: &Ctx<'js>, bridge: &Arc<dyn HostBridge>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let mcp = Object::new(ctx.clone())?;
    mcp.set("callTool", call_tool_fn(ctx, bridge.clone())?)?;
    mcp.set("log", log_fn(ctx, bridge.clone())?)?;
    globals.set("mcp", mcp)?;

    let console = Object::new(ctx.clone())?;
    for (method, level) in CONSOLE_METHODS {
        console.set(method, console_fn(ctx, bridge.clone(), level)?)?;
    }
    globals.set("console", console)?;

    Ok(())
}

fn call_tool_fn<'js>(ctx: &Ctx<'js>, bridge: Arc<dyn HostBridge>) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, name: Opt<Value<'js>>, params: Opt<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let Some(name) = name.0.as_ref().and_then(Value::as_string) else {
                return Err(Exception::throw_type(
                    &ctx,
                    "mcp.callTool requires a tool name in the form 'serverID.toolName'",
                ));
            };
            let name = name.to_string()?;

            let params = match params.0 {
                Some(value) if !value.is_undefined() && !value.is_null() => to_json(&ctx, value)?,
                _ => None,
            };

            match bridge.invoke_tool(&name, params) {
                Ok(result) => from_json(&ctx, &result),
                Err(e) => Err(Exception::throw_message(&ctx, &e.to_string())),
            }
        },
    )
}

fn log_fn<'js>(ctx: &Ctx<'js>, bridge: Arc<dyn HostBridge>) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
            let args = args.0;
            if args.len() < 2 {
                return Err(Exception::throw_type(
                    &ctx,
                    "mcp.log requires at least 2 arguments: level, message",
                ));
            }

            let level = match args[0].as_string() {
                Some(level) => level.to_string()?,
                None => String::new(),
            };
            let message = display(&args[1]);
            let fields = match args.get(2) {
                Some(value) if value.is_object() && !value.is_array() && !value.is_function() => {
                    match to_json(&ctx, value.clone())? {
                        Some(serde_json::Value::Object(fields)) => Some(fields),
                        _ => None,
                    }
                }
                _ => None,
            };

            bridge.log(&level, &message, fields);
            Ok(())
        },
    )
}

fn console_fn<'js>(
    ctx: &Ctx<'js>,
    bridge: Arc<dyn HostBridge>,
    level: &'static str,
) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |args: Rest<Value<'js>>| {
        let message = args.0.iter().map(display).collect::<Vec<_>>().join(" ");
        bridge.log(level, &message, None);
    })
}

/// `String(value)`, or a placeholder when even that throws.
fn display(value: &Value<'_>) -> String {
    if let Some(text) = value.as_string() {
        return text.to_string().unwrap_or_default();
    }
    value
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| "[unprintable]".to_string())
}

/// Converts through `JSON.stringify`. `None` for values JSON cannot express.
pub fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<Option<serde_json::Value>> {
    let Some(text) = ctx.json_stringify(value)? else {
        return Ok(None);
    };
    let text = text.to_string()?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| Exception::throw_type(ctx, &format!("value is not valid JSON: {e}")))
}

pub fn from_json<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    let text = serde_json::to_string(value)
        .map_err(|e| Exception::throw_internal(ctx, &format!("result is not serializable: {e}")))?;
    ctx.json_parse(text)
}
