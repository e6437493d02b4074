use std::{fmt, sync::Arc};

use crate::{
    backend::Connection,
    device::{DeviceDesc, EndpointDesc, InterfaceDesc},
    error::{bind_err, Action, BindError, ResultExt},
    Result,
};

/// A claimed video interface and the bulk IN endpoint frames are read from.
///
/// The interface stays claimed until [`Session::release`] is called.
pub struct Session {
    connection: Arc<dyn Connection>,
    interface: InterfaceDesc,
    endpoint: EndpointDesc,
}

impl Session {
    pub fn connection(&self) -> &dyn Connection {
        &*self.connection
    }

    pub fn interface(&self) -> &InterfaceDesc {
        &self.interface
    }

    pub fn endpoint(&self) -> EndpointDesc {
        self.endpoint
    }

    /// Releases the claimed interface. The connection itself stays open.
    pub fn release(&self) -> Result<()> {
        log::debug!("releasing interface {}", self.interface.number());
        self.connection
            .release_interface(self.interface.number())
            .during(Action::ReleasingSession)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("interface", &self.interface.number())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Claims the first video interface of `device` and picks its first bulk IN endpoint.
pub fn bind(device: &DeviceDesc, connection: Arc<dyn Connection>) -> Result<Session> {
    let interface = match device.interfaces().iter().find(|intf| intf.is_video_class()) {
        Some(intf) => intf,
        None => {
            log::warn!("{:?} has no video interface", device.id());
            return bind_err(BindError::NoVideoInterface, None);
        }
    };

    if let Err(e) = connection.claim_interface(interface.number()) {
        log::warn!("failed to claim interface {}: {}", interface.number(), e);
        return bind_err(BindError::ClaimFailed, Some(e));
    }

    let endpoint = match interface.endpoints().iter().find(|ep| ep.is_bulk_in()) {
        Some(ep) => *ep,
        None => {
            log::warn!(
                "interface {} has no bulk IN endpoint: {:?}",
                interface.number(),
                interface.endpoints()
            );
            if let Err(e) = connection.release_interface(interface.number()) {
                log::warn!("failed to release interface {}: {}", interface.number(), e);
            }
            return bind_err(BindError::NoEndpoint, None);
        }
    };

    log::info!(
        "bound interface {}, endpoint {:#04x} (max packet size {})",
        interface.number(),
        endpoint.address(),
        endpoint.max_packet_size(),
    );

    Ok(Session {
        connection,
        interface: interface.clone(),
        endpoint,
    })
}
