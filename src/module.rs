//! Crypto module installed into the runtime
//!
//! Constructors and free functions are registered by name. Constructors
//! validate, build the native capability and wrap it in a host object; no
//! worker activity happens until a method asks for it.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::host::{CipherHostObject, EcdhHostObject};
use crate::native::{self, Direction, SUPPORTED_CIPHERS, SUPPORTED_CURVES, SUPPORTED_HASHES};
use crate::runtime::CallContext;
use crate::validate::{self, Arguments};
use crate::value::{NativeValue, Value};

/// Signature of a module-level function
pub type ModuleFn = fn(&mut CallContext<'_>, &[Value]) -> Result<Value>;

/// Name-keyed registry of module functions
pub struct CryptoModule {
    functions: HashMap<&'static str, ModuleFn>,
}

impl Default for CryptoModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoModule {
    pub fn new() -> Self {
        let mut module = Self {
            functions: HashMap::new(),
        };
        module.register("createECDH", create_ecdh);
        module.register("createCipheriv", create_cipheriv);
        module.register("createDecipheriv", create_decipheriv);
        module.register("pbkdf2", pbkdf2);
        module.register("pbkdf2Sync", pbkdf2_sync);
        module.register("getCurves", get_curves);
        module.register("getCiphers", get_ciphers);
        module.register("getHashes", get_hashes);
        module
    }

    pub fn register(&mut self, name: &'static str, function: ModuleFn) {
        if self.functions.insert(name, function).is_some() {
            tracing::warn!(function = name, "Module function replaced");
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn call(&self, name: &str, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| BridgeError::invalid_argument(name, "no such function"))?;
        function(ctx, args)
    }
}

fn create_ecdh(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    let op = "createECDH";
    let params = validate::parse_create_ecdh(op, args)?;
    let engine = native::create_ecdh(op, &params)?;
    let host = EcdhHostObject::new(engine, Arc::clone(ctx.queue()));
    Ok(ctx.register_host(Rc::new(host)))
}

fn create_cipher(
    op: &str,
    direction: Direction,
    ctx: &mut CallContext<'_>,
    args: &[Value],
) -> Result<Value> {
    let params = validate::parse_create_cipher(op, args)?;
    let engine = native::create_cipher(op, &params, direction)?;
    let host = CipherHostObject::new(engine, Arc::clone(ctx.queue()));
    Ok(ctx.register_host(Rc::new(host)))
}

fn create_cipheriv(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    create_cipher("createCipheriv", Direction::Encrypt, ctx, args)
}

fn create_decipheriv(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    create_cipher("createDecipheriv", Direction::Decrypt, ctx, args)
}

fn pbkdf2(ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    let op = "pbkdf2";
    let params = validate::parse_pbkdf2(op, args)?;
    let digest = native::digest_by_name(op, &params.digest)?;

    let (promise, completion) = ctx.promise(op);
    ctx.queue().execute(
        op,
        move || {
            native::pbkdf2_derive(
                op,
                digest,
                &params.password,
                &params.salt,
                params.iterations,
                params.keylen,
            )
            .map(NativeValue::Bytes)
        },
        move |result| completion.complete(result),
    );
    Ok(promise)
}

fn pbkdf2_sync(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    let op = "pbkdf2Sync";
    let params = validate::parse_pbkdf2(op, args)?;
    let digest = native::digest_by_name(op, &params.digest)?;
    let key = native::pbkdf2_derive(
        op,
        digest,
        &params.password,
        &params.salt,
        params.iterations,
        params.keylen,
    )?;
    Ok(Value::Bytes(key))
}

fn name_list(op: &str, args: &[Value], names: &[&str]) -> Result<Value> {
    Arguments::new(op, args).at_most(0)?;
    Ok(Value::Array(names.iter().map(|n| Value::from(*n)).collect()))
}

fn get_curves(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    name_list("getCurves", args, SUPPORTED_CURVES)
}

fn get_ciphers(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    name_list("getCiphers", args, SUPPORTED_CIPHERS)
}

fn get_hashes(_ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Value> {
    name_list("getHashes", args, SUPPORTED_HASHES)
}
