//! The privileged realm exposed to sandboxed pages.

use proxybridge::{Realm, Value};

/// Builds the global object: `ext.app.getDetails()` and `console.log(...)`.
pub fn build_realm() -> Realm {
    let realm = Realm::new();
    let global = realm.global();

    let app = realm.new_object();
    let details_realm = realm.clone();
    app.insert(
        "getDetails",
        realm.new_function(move |_, _| {
            let details = details_realm.new_object();
            details.insert("version", env!("CARGO_PKG_VERSION"));
            Ok(Value::from(details))
        }),
    );
    let ext = realm.new_object();
    ext.insert("app", app);
    global.insert("ext", ext);

    let console = realm.new_object();
    console.insert(
        "log",
        realm.new_function(|_, args| {
            let line = args.iter().map(display).collect::<Vec<_>>().join(" ");
            tracing::info!(target: "proxybridge_host::console", "{}", line);
            Ok(Value::Undefined)
        }),
    );
    global.insert("console", console);

    realm
}

fn display(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Str(s) => s.clone(),
        Value::Date(ms) => format!("Date({ms})"),
        Value::Pattern(p) => format!("/{}/{}", p.source, p.flags),
        // Not expanded: arrays may contain themselves.
        Value::Array(arr) => format!("Array({})", arr.len()),
        Value::Object(obj) if obj.is_callable() => "[function]".to_string(),
        Value::Object(_) => "[object Object]".to_string(),
    }
}
