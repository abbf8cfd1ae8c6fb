use rquickjs::Ctx;

/// Locks down a fresh context. Must run after the host objects are installed
/// and before any script code.
///
/// Prototypes are frozen first, while the constructors being removed
/// afterwards are still reachable. `Array.prototype.constructor` reads as
/// `undefined` instead of throwing so that `map`/`filter` keep building
/// plain arrays. `Promise.prototype` is sealed as well because dynamic
/// `import()` still hands out promises after the global is gone.
const HARDEN_SCRIPT: &str = r#"
(function (global) {
  "use strict";

  var deny = function () {
    throw new TypeError("Access to constructor is not allowed");
  };
  var hide = function () {
    return undefined;
  };
  var seal = function (proto, getter) {
    Object.defineProperty(proto, "constructor", {
      get: getter,
      set: deny,
      enumerable: false,
      configurable: false
    });
    Object.freeze(proto);
  };

  var generatorProto = Object.getPrototypeOf(function* () {});
  var asyncProto = Object.getPrototypeOf(async function () {});
  var asyncGeneratorProto = Object.getPrototypeOf(async function* () {});

  seal(Array.prototype, hide);
  [
    Object.prototype,
    String.prototype,
    Number.prototype,
    Boolean.prototype,
    generatorProto,
    asyncProto,
    asyncGeneratorProto,
    global.Promise.prototype,
    Function.prototype
  ].forEach(function (proto) {
    seal(proto, deny);
  });

  [
    "eval",
    "Function",
    "GeneratorFunction",
    "AsyncFunction",
    "AsyncGeneratorFunction",
    "Reflect",
    "Proxy",
    "WebAssembly",
    "Promise",
    "queueMicrotask"
  ].forEach(function (name) {
    Object.defineProperty(global, name, {
      value: undefined,
      writable: false,
      enumerable: false,
      configurable: false
    });
  });

  ["mcp", "console"].forEach(function (name) {
    Object.freeze(global[name]);
    Object.defineProperty(global, name, { writable: false, configurable: false });
  });
})(globalThis);
"#;

pub fn harden(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    ctx.eval::<(), _>(HARDEN_SCRIPT)
}
