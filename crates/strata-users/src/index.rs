use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use strata_rules::{AuthLookup, OP_LOGIN, OP_SIGNUP};
use strata_types::{OpObject, Operation};
use tracing::debug;

use crate::error::UsersError;

/// Identity object together with the operation that introduced it.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthRecord {
    pub op_hash: String,
    pub object: OpObject,
}

/// Authentication material of one identity within a single layer.
///
/// A layer may hold logins for an identity whose signup lives in a parent
/// layer, in which case `signup` is `None` here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActiveUser {
    pub name: String,
    pub signup: Option<AuthRecord>,
    pub logins: Vec<AuthRecord>,
}

impl ActiveUser {
    fn is_empty(&self) -> bool {
        self.signup.is_none() && self.logins.is_empty()
    }
}

#[derive(Default)]
struct Layer {
    users: HashMap<String, ActiveUser>,
    /// Auth operations applied to this layer, in order.
    applied: Vec<Operation>,
}

/// One layer of the active-user index.
///
/// Lookups consult this layer first and fall through to the parent.
/// Mutations only ever touch this layer.
#[derive(Default)]
pub struct ActiveUsers {
    parent: Option<Arc<ActiveUsers>>,
    layer: RwLock<Layer>,
}

impl ActiveUsers {
    /// A root layer with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// A layer reading through to `parent`.
    pub fn layered(parent: Arc<ActiveUsers>) -> Self {
        Self {
            parent: Some(parent),
            layer: RwLock::default(),
        }
    }

    /// The parent layer, if any.
    pub fn parent(&self) -> Option<&Arc<ActiveUsers>> {
        self.parent.as_ref()
    }

    /// Number of identities with an entry in this layer alone.
    pub fn local_len(&self) -> usize {
        self.read(|layer| layer.users.len())
    }

    /// This layer's entry for `name`, without consulting parents.
    pub fn local_user(&self, name: &str) -> Option<ActiveUser> {
        self.read(|layer| layer.users.get(name).cloned())
    }

    /// Record an executed auth operation.
    ///
    /// Returns `Ok(false)` for operations that carry no authentication
    /// material. A signup fails if the identity already exists in this layer
    /// or any parent; a login requires an existing signup.
    pub fn add_auth_operation(&self, op: &Operation) -> Result<bool, UsersError> {
        if op.op_type != OP_SIGNUP && op.op_type != OP_LOGIN {
            return Ok(false);
        }
        let object = single_object(op)?;
        let name = object
            .name()
            .ok_or_else(|| malformed(op, "identity object has an empty id"))?
            .to_string();
        let record = AuthRecord {
            op_hash: op.hash.clone(),
            object: object.clone(),
        };

        let mut layer = self.layer.write().unwrap_or_else(PoisonError::into_inner);
        if op.op_type == OP_SIGNUP {
            let exists = layer
                .users
                .get(&name)
                .is_some_and(|u| u.signup.is_some())
                || self.parent_signup(&name).is_some();
            if exists {
                return Err(UsersError::AlreadySignedUp(name));
            }
            entry(&mut layer.users, &name).signup = Some(record);
        } else {
            if object.site().is_none() {
                return Err(malformed(op, "login object id must be [nickname, site]"));
            }
            let signed_up = layer
                .users
                .get(&name)
                .is_some_and(|u| u.signup.is_some())
                || self.parent_signup(&name).is_some();
            if !signed_up {
                return Err(UsersError::NotSignedUp {
                    name,
                    op: op.hash.clone(),
                });
            }
            entry(&mut layer.users, &name).logins.push(record);
        }
        layer.applied.push(op.clone());
        debug!(user = %name, op = %op.hash, kind = %op.op_type, "auth operation recorded");
        Ok(true)
    }

    /// Remove an auth operation previously recorded in this layer.
    ///
    /// Used on the queue layer once the operation has been committed into a
    /// block or dropped from the queue. Returns whether anything was removed.
    pub fn remove_auth_operation(&self, op: &Operation) -> bool {
        let Some(name) = op.new.first().and_then(OpObject::name) else {
            return false;
        };
        let mut layer = self.layer.write().unwrap_or_else(PoisonError::into_inner);
        let before = layer.applied.len();
        layer.applied.retain(|applied| applied.hash != op.hash);
        let removed = layer.applied.len() != before;

        if let Some(user) = layer.users.get_mut(name) {
            if user.signup.as_ref().is_some_and(|s| s.op_hash == op.hash) {
                user.signup = None;
            }
            user.logins.retain(|login| login.op_hash != op.hash);
            if user.is_empty() {
                layer.users.remove(name);
            }
        }
        removed
    }

    /// Replay this layer's operations into its parent and clear this layer.
    ///
    /// Returns the number of operations moved.
    pub fn commit_into_parent(&self) -> Result<usize, UsersError> {
        let parent = self.parent.as_ref().ok_or(UsersError::NoParent)?;
        let mut layer = self.layer.write().unwrap_or_else(PoisonError::into_inner);
        let applied = std::mem::take(&mut layer.applied);
        layer.users.clear();
        drop(layer);

        for op in &applied {
            parent.add_auth_operation(op)?;
        }
        Ok(applied.len())
    }

    /// Drop every entry in this layer.
    pub fn clear(&self) {
        let mut layer = self.layer.write().unwrap_or_else(PoisonError::into_inner);
        layer.users.clear();
        layer.applied.clear();
    }

    fn read<R>(&self, f: impl FnOnce(&Layer) -> R) -> R {
        let layer = self.layer.read().unwrap_or_else(PoisonError::into_inner);
        f(&layer)
    }

    fn parent_signup(&self, name: &str) -> Option<OpObject> {
        self.parent.as_ref().and_then(|p| p.signup(name))
    }
}

impl AuthLookup for ActiveUsers {
    fn signup(&self, nickname: &str) -> Option<OpObject> {
        let local = self.read(|layer| {
            layer
                .users
                .get(nickname)
                .and_then(|u| u.signup.as_ref())
                .map(|s| s.object.clone())
        });
        local.or_else(|| self.parent_signup(nickname))
    }

    fn login(&self, nickname: &str, site: &str) -> Option<OpObject> {
        let local = self.read(|layer| {
            layer.users.get(nickname).and_then(|u| {
                u.logins
                    .iter()
                    .rev()
                    .find(|l| l.object.site() == Some(site))
                    .map(|l| l.object.clone())
            })
        });
        local.or_else(|| self.parent.as_ref().and_then(|p| p.login(nickname, site)))
    }
}

impl std::fmt::Debug for ActiveUsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveUsers")
            .field("local_users", &self.local_len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

fn entry<'a>(users: &'a mut HashMap<String, ActiveUser>, name: &str) -> &'a mut ActiveUser {
    users.entry(name.to_string()).or_insert_with(|| ActiveUser {
        name: name.to_string(),
        ..ActiveUser::default()
    })
}

fn single_object(op: &Operation) -> Result<&OpObject, UsersError> {
    match op.new.as_slice() {
        [object] => Ok(object),
        other => Err(malformed(
            op,
            &format!("expected exactly one new object, found {}", other.len()),
        )),
    }
}

fn malformed(op: &Operation, reason: &str) -> UsersError {
    UsersError::MalformedAuthOperation {
        op: op.hash.clone(),
        reason: reason.to_string(),
    }
}
