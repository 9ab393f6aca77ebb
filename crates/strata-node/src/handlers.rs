use std::collections::BTreeMap;

use strata_crypto::{VerifyingKey, SIGNATURE_ALGO};
use strata_rules::{validate_nickname, AuthLookup, F_ALGO, F_PUBKEY, OP_LOGIN, OP_SIGNUP};
use strata_types::{OpObject, Operation};
use strata_users::ActiveUsers;

use crate::error::{NodeError, NodeResult};
use crate::ledger::StateTransaction;

// ---------------------------------------------------------------------------
// OperationHandler
// ---------------------------------------------------------------------------

/// Validation and execution logic for one operation type.
///
/// `prepare` must not mutate anything; it runs during queue admission and
/// every block validation pass. `execute` applies the operation inside the
/// block's transaction.
pub trait OperationHandler: Send + Sync {
    /// The operation type this handler is registered under.
    fn op_type(&self) -> &str;

    /// Human-readable description for diagnostics.
    fn description(&self) -> &str;

    /// Check that the operation is well formed given the known identities.
    fn prepare(&self, op: &Operation, users: &ActiveUsers) -> NodeResult<()>;

    /// Apply the operation to ledger state.
    fn execute(&self, op: &Operation, tx: &mut StateTransaction<'_>) -> NodeResult<()>;
}

fn single_new(op: &Operation) -> NodeResult<&OpObject> {
    match op.new.as_slice() {
        [object] => Ok(object),
        other => Err(NodeError::invalid(
            &op.hash,
            format!("expected exactly one new object, found {}", other.len()),
        )),
    }
}

fn check_key_material(op: &Operation, object: &OpObject) -> NodeResult<()> {
    let pubkey = object
        .field_str(F_PUBKEY)
        .ok_or_else(|| NodeError::invalid(&op.hash, "identity object has no pubkey"))?;
    VerifyingKey::from_hex(pubkey).map_err(|e| NodeError::invalid(&op.hash, e.to_string()))?;
    match object.field_str(F_ALGO) {
        Some(algo) if algo != SIGNATURE_ALGO => Err(NodeError::invalid(
            &op.hash,
            format!("unsupported key algorithm {algo:?}"),
        )),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// `sys.signup`: registers one identity `[nickname]` with its public key.
#[derive(Debug, Default)]
pub struct SignupHandler;

impl OperationHandler for SignupHandler {
    fn op_type(&self) -> &str {
        OP_SIGNUP
    }

    fn description(&self) -> &str {
        "register a new identity and its signing key"
    }

    fn prepare(&self, op: &Operation, _users: &ActiveUsers) -> NodeResult<()> {
        let object = single_new(op)?;
        let [name] = object.id.as_slice() else {
            return Err(NodeError::invalid(&op.hash, "signup object id must be [nickname]"));
        };
        validate_nickname(name)?;
        check_key_material(op, object)
    }

    fn execute(&self, op: &Operation, tx: &mut StateTransaction<'_>) -> NodeResult<()> {
        tx.create(OP_SIGNUP, single_new(op)?.clone())
    }
}

/// `sys.login`: attaches a site key `[nickname, site]` to a signed-up
/// identity. A later login for the same site replaces the earlier one.
#[derive(Debug, Default)]
pub struct LoginHandler;

impl OperationHandler for LoginHandler {
    fn op_type(&self) -> &str {
        OP_LOGIN
    }

    fn description(&self) -> &str {
        "attach a site-specific login key to an identity"
    }

    fn prepare(&self, op: &Operation, users: &ActiveUsers) -> NodeResult<()> {
        let object = single_new(op)?;
        let [name, site] = object.id.as_slice() else {
            return Err(NodeError::invalid(&op.hash, "login object id must be [nickname, site]"));
        };
        validate_nickname(name)?;
        if site.is_empty() {
            return Err(NodeError::invalid(&op.hash, "login site is empty"));
        }
        if users.signup(name).is_none() {
            return Err(NodeError::invalid(
                &op.hash,
                format!("identity {name:?} is not signed up"),
            ));
        }
        check_key_material(op, object)
    }

    fn execute(&self, op: &Operation, tx: &mut StateTransaction<'_>) -> NodeResult<()> {
        tx.put(OP_LOGIN, single_new(op)?.clone());
        Ok(())
    }
}

/// Generic application objects: creates every `new` object and removes
/// every `delete` id under the operation's own type.
#[derive(Debug)]
pub struct ObjectHandler {
    op_type: String,
    description: String,
}

impl ObjectHandler {
    pub fn new(op_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            description: description.into(),
        }
    }
}

impl OperationHandler for ObjectHandler {
    fn op_type(&self) -> &str {
        &self.op_type
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn prepare(&self, op: &Operation, _users: &ActiveUsers) -> NodeResult<()> {
        if op.new.is_empty() && op.deleted.is_empty() {
            return Err(NodeError::invalid(&op.hash, "operation changes no objects"));
        }
        let ids = op.new.iter().map(|o| &o.id).chain(&op.deleted);
        if ids.into_iter().any(|id| id.is_empty() || id.iter().any(String::is_empty)) {
            return Err(NodeError::invalid(&op.hash, "object id is empty"));
        }
        Ok(())
    }

    fn execute(&self, op: &Operation, tx: &mut StateTransaction<'_>) -> NodeResult<()> {
        for id in &op.deleted {
            tx.delete(&op.op_type, id)?;
        }
        for object in &op.new {
            tx.create(&op.op_type, object.clone())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OperationsRegistry
// ---------------------------------------------------------------------------

/// Dispatch table from operation type to handler.
///
/// Built once at startup and handed to the block manager. Operations of an
/// unregistered type are rejected.
#[derive(Default)]
pub struct OperationsRegistry {
    handlers: BTreeMap<String, Box<dyn OperationHandler>>,
}

impl OperationsRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the identity handlers (`sys.signup`, `sys.login`).
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SignupHandler));
        registry.register(Box::new(LoginHandler));
        registry
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(
        &mut self,
        handler: Box<dyn OperationHandler>,
    ) -> Option<Box<dyn OperationHandler>> {
        self.handlers.insert(handler.op_type().to_string(), handler)
    }

    /// Register an [`ObjectHandler`] for an application operation type.
    pub fn register_object_type(
        &mut self,
        op_type: impl Into<String>,
        description: impl Into<String>,
    ) -> &mut Self {
        self.register(Box::new(ObjectHandler::new(op_type, description)));
        self
    }

    pub fn get(&self, op_type: &str) -> Option<&dyn OperationHandler> {
        self.handlers.get(op_type).map(|h| &**h)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.handlers.contains_key(op_type)
    }

    /// Registered types with their descriptions, sorted by type.
    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.handlers
            .values()
            .map(|h| (h.op_type(), h.description()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn handler(&self, op: &Operation) -> NodeResult<&dyn OperationHandler> {
        self.get(&op.op_type)
            .ok_or_else(|| NodeError::UnknownOperationType(op.op_type.clone()))
    }

    pub fn prepare(&self, op: &Operation, users: &ActiveUsers) -> NodeResult<()> {
        self.handler(op)?.prepare(op, users)
    }

    pub fn execute(&self, op: &Operation, tx: &mut StateTransaction<'_>) -> NodeResult<()> {
        self.handler(op)?.execute(op, tx)
    }
}

impl std::fmt::Debug for OperationsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationsRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
