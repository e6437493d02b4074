//! Permission to open a device, delivered asynchronously by the platform.
//!
//! Platforms that show a permission prompt hand the [`PermissionResponder`] to whatever receives
//! the user's answer; the capture controller waits on the matching [`PermissionRequest`].

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::channel::oneshot;

use crate::{
    error::{err, Action},
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Creates a connected responder/request pair.
pub fn permission_channel() -> (PermissionResponder, PermissionRequest) {
    let (tx, rx) = oneshot::channel();
    (PermissionResponder { tx }, PermissionRequest { rx })
}

/// Resolves a [`PermissionRequest`]. Dropping it without responding revokes the request.
#[derive(Debug)]
pub struct PermissionResponder {
    tx: oneshot::Sender<Permission>,
}

impl PermissionResponder {
    pub fn grant(self) {
        self.respond(Permission::Granted)
    }

    pub fn deny(self) {
        self.respond(Permission::Denied)
    }

    pub fn respond(self, permission: Permission) {
        if self.tx.send(permission).is_err() {
            log::debug!("permission request dropped before {:?} arrived", permission);
        }
    }
}

/// Resolves to `Ok(())` once permission has been granted.
#[derive(Debug)]
pub struct PermissionRequest {
    rx: oneshot::Receiver<Permission>,
}

impl PermissionRequest {
    /// A request that is already granted, for platforms without access prompts.
    pub fn granted() -> Self {
        let (responder, request) = permission_channel();
        responder.grant();
        request
    }

    /// Blocks the current thread until the request is resolved.
    pub fn wait(self) -> Result<()> {
        futures::executor::block_on(self)
    }
}

impl Future for PermissionRequest {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(Permission::Granted) => Ok(()),
            Ok(Permission::Denied) => err("permission denied", Action::RequestingPermission),
            Err(oneshot::Canceled) => err(
                "permission request revoked without an answer",
                Action::RequestingPermission,
            ),
        })
    }
}
