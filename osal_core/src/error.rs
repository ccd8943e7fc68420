//! Crate-wide error type, following the shape of the teacher crate's
//! `resilient_reactor_thread::rrt_types::SubscribeError`: a `thiserror`
//! enum carrying `miette::Diagnostic` codes and help text.

use crate::handle::{Handle, Kind};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    #[error("handle {handle:?} is unknown, destroyed, or stale")]
    #[diagnostic(
        code(osal_core::invalid_handle),
        help("the handle was never created in this registry, has already been destroyed, \
              or names a slot that has since been recycled for a different object")
    )]
    InvalidHandle { handle: Handle },

    #[error("handle {handle:?} has kind {actual:?}, expected {expected:?}")]
    #[diagnostic(
        code(osal_core::wrong_kind),
        help("pass a handle of the expected kind, or add a classifier arm if this kind is new")
    )]
    WrongKind {
        handle: Handle,
        expected: Kind,
        actual: Kind,
    },

    #[error("failed to allocate {resource}")]
    #[diagnostic(code(osal_core::resource_exhausted))]
    ResourceExhausted { resource: &'static str },

    #[error("failed to initialize the OS poll descriptor")]
    #[diagnostic(
        code(osal_core::poll_init),
        help("check the process file-descriptor limit (ulimit -n)")
    )]
    PollInit(#[source] std::io::Error),

    #[error("failed to register a readiness source with the poll descriptor")]
    #[diagnostic(code(osal_core::poll_register))]
    PollRegister(#[source] std::io::Error),

    #[error("failed to spawn OS thread")]
    #[diagnostic(code(osal_core::thread_spawn))]
    ThreadSpawn(#[source] std::io::Error),

    #[error("cannot destroy a wait-set with registered handles still attached")]
    #[diagnostic(
        code(osal_core::wait_set_not_empty),
        help("call remove/wake on every registered handle before destroying the wait-set")
    )]
    WaitSetNotEmpty,

    #[error("handle {handle:?} is itself a wait-set and cannot be registered into another wait-set")]
    #[diagnostic(code(osal_core::cannot_nest_wait_set))]
    CannotNestWaitSet { handle: Handle },

    #[error("{which} lock was poisoned by a panicking holder")]
    #[diagnostic(code(osal_core::lock_poisoned))]
    LockPoisoned { which: &'static str },

    #[error("socket operation failed")]
    #[diagnostic(code(osal_core::socket_io))]
    SocketIo(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
