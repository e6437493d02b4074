//! Static descriptions of attached USB devices.
//!
//! These are snapshots taken at enumeration time. A [`DeviceDesc`] goes stale when its device is
//! unplugged; opening a stale device fails.

use std::fmt;

pub use rusb::{Direction, TransferType};

/// USB class code of video devices and interfaces.
pub const CLASS_VIDEO: u8 = 0x0E;

/// Locates a device on the bus. Only meaningful to the backend that enumerated it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    bus_number: u8,
    address: u8,
}

impl DeviceId {
    pub fn new(bus_number: u8, address: u8) -> Self {
        Self {
            bus_number,
            address,
        }
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bus {:03} Device {:03}", self.bus_number, self.address)
    }
}

/// Describes an attached USB device.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    id: DeviceId,
    vendor_id: u16,
    product_id: u16,
    class_code: u8,
    interfaces: Vec<InterfaceDesc>,
}

impl DeviceDesc {
    pub fn new(
        id: DeviceId,
        vendor_id: u16,
        product_id: u16,
        class_code: u8,
        interfaces: Vec<InterfaceDesc>,
    ) -> Self {
        Self {
            id,
            vendor_id,
            product_id,
            class_code,
            interfaces,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// The class code from the device descriptor.
    ///
    /// Composite devices usually leave this at 0 or set it to 0xEF (miscellaneous) and declare
    /// their classes per interface instead.
    pub fn class_code(&self) -> u8 {
        self.class_code
    }

    /// Interfaces of the device, in descriptor order.
    pub fn interfaces(&self) -> &[InterfaceDesc] {
        &self.interfaces
    }

    pub fn is_video_class(&self) -> bool {
        self.class_code == CLASS_VIDEO
    }

    pub fn has_video_interface(&self) -> bool {
        self.interfaces.iter().any(InterfaceDesc::is_video_class)
    }
}

/// Describes the default alternate setting of a USB interface.
#[derive(Debug, Clone)]
pub struct InterfaceDesc {
    number: u8,
    class_code: u8,
    sub_class_code: u8,
    endpoints: Vec<EndpointDesc>,
}

impl InterfaceDesc {
    pub fn new(
        number: u8,
        class_code: u8,
        sub_class_code: u8,
        endpoints: Vec<EndpointDesc>,
    ) -> Self {
        Self {
            number,
            class_code,
            sub_class_code,
            endpoints,
        }
    }

    /// The `bInterfaceNumber` used to claim the interface.
    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn class_code(&self) -> u8 {
        self.class_code
    }

    pub fn sub_class_code(&self) -> u8 {
        self.sub_class_code
    }

    /// Endpoints of the interface, in descriptor order.
    pub fn endpoints(&self) -> &[EndpointDesc] {
        &self.endpoints
    }

    pub fn is_video_class(&self) -> bool {
        self.class_code == CLASS_VIDEO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDesc {
    address: u8,
    transfer_type: TransferType,
    direction: Direction,
    max_packet_size: u16,
}

impl EndpointDesc {
    pub fn new(
        address: u8,
        transfer_type: TransferType,
        direction: Direction,
        max_packet_size: u16,
    ) -> Self {
        Self {
            address,
            transfer_type,
            direction,
            max_packet_size,
        }
    }

    /// The `bEndpointAddress`, including the direction bit.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn is_bulk_in(&self) -> bool {
        self.transfer_type == TransferType::Bulk && self.direction == Direction::In
    }
}
