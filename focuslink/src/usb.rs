//! USB device enumeration.
//!
//! Serial enumeration only sees devices that registered a tty. Bootloaders
//! speaking DFU, FLIP or HalfKay never do, so discovery also scans the USB
//! bus directly through a [`UsbScanner`].

use crate::error::Result;

#[cfg(feature = "native")]
use log::trace;

/// A device seen on the USB bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// USB Vendor ID.
    pub vendor_id: u16,
    /// USB Product ID.
    pub product_id: u16,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

impl UsbDeviceInfo {
    /// Create a bare entry with only the ids filled in.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }
}

/// Scans the USB bus.
pub trait UsbScanner: Send + Sync {
    /// List attached devices, optionally restricted to a product and/or vendor id.
    fn scan(&self, product_id: Option<u16>, vendor_id: Option<u16>) -> Result<Vec<UsbDeviceInfo>>;
}

/// Keep the entries matching the optional filters.
pub fn filter_devices(
    devices: impl IntoIterator<Item = UsbDeviceInfo>,
    product_id: Option<u16>,
    vendor_id: Option<u16>,
) -> Vec<UsbDeviceInfo> {
    devices
        .into_iter()
        .filter(|d| product_id.is_none_or(|pid| d.product_id == pid))
        .filter(|d| vendor_id.is_none_or(|vid| d.vendor_id == vid))
        .collect()
}

/// Scanner backed by `nusb`.
#[cfg(feature = "native")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeUsbScanner;

#[cfg(feature = "native")]
impl UsbScanner for NativeUsbScanner {
    fn scan(&self, product_id: Option<u16>, vendor_id: Option<u16>) -> Result<Vec<UsbDeviceInfo>> {
        let devices = nusb::list_devices()?.map(|info| {
            trace!(
                "USB device {:04X}:{:04X} {:?}",
                info.vendor_id(),
                info.product_id(),
                info.product_string()
            );
            UsbDeviceInfo {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                manufacturer: info
                    .manufacturer_string()
                    .map(str::to_string),
                product: info
                    .product_string()
                    .map(str::to_string),
            }
        });
        Ok(filter_devices(devices, product_id, vendor_id))
    }
}

/// Scanner returning a fixed device list.
#[cfg(test)]
pub(crate) struct StaticScanner(pub(crate) Vec<UsbDeviceInfo>);

#[cfg(test)]
impl UsbScanner for StaticScanner {
    fn scan(&self, product_id: Option<u16>, vendor_id: Option<u16>) -> Result<Vec<UsbDeviceInfo>> {
        Ok(filter_devices(self.0.clone(), product_id, vendor_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_devices() {
        let devices = vec![
            UsbDeviceInfo::new(0x1209, 0x2301),
            UsbDeviceInfo::new(0x1209, 0x2302),
            UsbDeviceInfo::new(0x3496, 0x0006),
        ];

        assert_eq!(filter_devices(devices.clone(), None, None).len(), 3);
        assert_eq!(filter_devices(devices.clone(), None, Some(0x1209)).len(), 2);
        assert_eq!(
            filter_devices(devices.clone(), Some(0x2302), Some(0x1209)),
            vec![UsbDeviceInfo::new(0x1209, 0x2302)]
        );
        assert!(filter_devices(devices, Some(0x2302), Some(0x3496)).is_empty());
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_native_scan_does_not_panic() {
        let _ = NativeUsbScanner.scan(None, None);
    }
}
