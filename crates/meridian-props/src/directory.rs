//! Property directory
//!
//! One directory task per namespace owns the scope registry: which
//! accepted port registered which scope. All mutations are serialized
//! through that task; other tasks only send registration requests and
//! await the asynchronous answer.
//!
//! [`SharedDirectory`] wraps the registry for the benefit of harnesses
//! and tooling that inspect it from outside the owning task.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use meridian_core::{DirectorySignal, Event, PortId, ProtocolId, ResultCode, Signal};
use meridian_runtime::{Flow, PortSpec, TaskContext, TaskEvent, TaskHandler, TaskSpec};
use meridian_wire::{ResultReply, ScopeRequest};

/// Listener port name directory tasks bind
pub const DIRECTORY_PORT: &str = "directory";

/// Scope registry: scope name to the port that registered it
#[derive(Debug, Default)]
pub struct Directory {
    scopes: BTreeMap<String, PortId>,
}

impl Directory {
    pub fn new() -> Self {
        Directory::default()
    }

    /// Claim a scope for `owner`; an occupied scope is refused
    pub fn register(&mut self, scope: &str, owner: PortId) -> ResultCode {
        match self.scopes.entry(scope.to_string()) {
            std::collections::btree_map::Entry::Occupied(_) => ResultCode::ScopeAlreadyExists,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(owner);
                ResultCode::NoError
            }
        }
    }

    /// Free a scope; only its owner may do so
    pub fn unregister(&mut self, scope: &str, owner: PortId) -> ResultCode {
        match self.scopes.get(scope) {
            None => ResultCode::PropertySetGone,
            Some(holder) if *holder != owner => ResultCode::ScopeAlreadyExists,
            Some(_) => {
                self.scopes.remove(scope);
                ResultCode::NoError
            }
        }
    }

    pub fn lookup(&self, scope: &str) -> Option<PortId> {
        self.scopes.get(scope).copied()
    }

    /// Free every scope held by `owner`, returning the freed names
    pub fn drop_owner(&mut self, owner: PortId) -> Vec<String> {
        let freed: Vec<String> = self
            .scopes
            .iter()
            .filter(|(_, holder)| **holder == owner)
            .map(|(scope, _)| scope.clone())
            .collect();
        for scope in &freed {
            self.scopes.remove(scope);
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Cloneable handle on a directory registry
#[derive(Clone, Default)]
pub struct SharedDirectory(Arc<RwLock<Directory>>);

impl SharedDirectory {
    pub fn new() -> Self {
        SharedDirectory::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Directory> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Directory> {
        self.0.write()
    }
}

/// Reactor shell serving the directory protocol
pub struct DirectoryTask {
    directory: SharedDirectory,
}

impl DirectoryTask {
    pub fn new(directory: SharedDirectory) -> Self {
        DirectoryTask { directory }
    }

    /// Task spec with the directory listener
    pub fn spec(task: impl Into<String>) -> TaskSpec {
        TaskSpec::new(task).port(PortSpec::listen(DIRECTORY_PORT, ProtocolId::Directory))
    }
}

impl TaskHandler for DirectoryTask {
    fn handle(&mut self, ctx: &mut TaskContext<'_>, event: TaskEvent) -> Flow {
        match event {
            TaskEvent::Received { port, event } => {
                let Signal::Directory(signal) = event.signal else {
                    return Flow::Continue;
                };
                let (reply_signal, result) = match signal {
                    DirectorySignal::RegisterScope => match ScopeRequest::decode(&event.payload) {
                        Ok(request) => {
                            let result = self.directory.write().register(&request.scope, port);
                            debug!(scope = %request.scope, %port, result = ?result, "register");
                            (DirectorySignal::ScopeRegistered, result)
                        }
                        Err(e) => {
                            warn!(%port, error = %e, "malformed register request; dropped");
                            return Flow::Continue;
                        }
                    },
                    DirectorySignal::UnregisterScope => match ScopeRequest::decode(&event.payload)
                    {
                        Ok(request) => {
                            let result = self.directory.write().unregister(&request.scope, port);
                            debug!(scope = %request.scope, %port, result = ?result, "unregister");
                            (DirectorySignal::ScopeUnregistered, result)
                        }
                        Err(e) => {
                            warn!(%port, error = %e, "malformed unregister request; dropped");
                            return Flow::Continue;
                        }
                    },
                    other => {
                        warn!(signal = ?other, %port, "signal not served by the directory; dropped");
                        return Flow::Continue;
                    }
                };
                ctx.reply(
                    port,
                    event.seq_nr,
                    Event::with_payload(
                        Signal::Directory(reply_signal),
                        ResultReply::new(result).encode(),
                    ),
                );
            }
            TaskEvent::Disconnected { port, .. } => {
                let freed = self.directory.write().drop_owner(port);
                if !freed.is_empty() {
                    debug!(%port, scopes = ?freed, "owner disconnected; scopes freed");
                }
            }
            _ => {}
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_conflict() {
        let mut directory = Directory::new();
        let a = PortId::new(1);
        let b = PortId::new(2);

        assert_eq!(directory.register("station.lba", a), ResultCode::NoError);
        assert_eq!(
            directory.register("station.lba", b),
            ResultCode::ScopeAlreadyExists
        );
        assert_eq!(directory.lookup("station.lba"), Some(a));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_unregister_checks_owner() {
        let mut directory = Directory::new();
        let a = PortId::new(1);
        let b = PortId::new(2);
        directory.register("s", a);

        assert_eq!(directory.unregister("s", b), ResultCode::ScopeAlreadyExists);
        assert_eq!(directory.unregister("s", a), ResultCode::NoError);
        assert_eq!(directory.unregister("s", a), ResultCode::PropertySetGone);
        assert!(directory.is_empty());
    }

    #[test]
    fn test_drop_owner_frees_all_scopes() {
        let mut directory = Directory::new();
        let a = PortId::new(1);
        let b = PortId::new(2);
        directory.register("one", a);
        directory.register("two", a);
        directory.register("three", b);

        let mut freed = directory.drop_owner(a);
        freed.sort();
        assert_eq!(freed, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.lookup("three"), Some(b));
    }

    #[test]
    fn test_scope_reusable_after_free() {
        let mut directory = Directory::new();
        let a = PortId::new(1);
        let b = PortId::new(2);
        directory.register("s", a);
        directory.drop_owner(a);
        assert_eq!(directory.register("s", b), ResultCode::NoError);
    }

    #[test]
    fn test_shared_handle_sees_task_writes() {
        let shared = SharedDirectory::new();
        let clone = shared.clone();
        clone.write().register("x", PortId::new(9));
        assert_eq!(shared.read().lookup("x"), Some(PortId::new(9)));
    }

    #[test]
    fn test_directory_spec() {
        let spec = DirectoryTask::spec("dir");
        assert_eq!(spec.ports.len(), 1);
        assert_eq!(spec.ports[0].name, DIRECTORY_PORT);
        assert_eq!(spec.ports[0].protocol, ProtocolId::Directory);
    }
}
