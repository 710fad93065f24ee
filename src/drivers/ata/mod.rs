pub mod pio;

use pio::AtaDevice;
use spin::Mutex;
use lazy_static::lazy_static;

/// The four conventional ISA ATA I/O port bases: primary master/slave on
/// the first controller, secondary master/slave on the second — backing
/// `/dev/hda`..`/dev/hdd` in that order.
const CONTROLLERS: [(u16, u16, bool); 4] = [
    (0x1F0, 0x3F6, true),
    (0x1F0, 0x3F6, false),
    (0x170, 0x376, true),
    (0x170, 0x376, false),
];

pub const DEVICE_NAMES: [&str; 4] = ["hda", "hdb", "hdc", "hdd"];

lazy_static! {
    pub static ref DEVICES: [Mutex<AtaDevice>; 4] = [
        Mutex::new(AtaDevice::new(CONTROLLERS[0].0, CONTROLLERS[0].1, CONTROLLERS[0].2)),
        Mutex::new(AtaDevice::new(CONTROLLERS[1].0, CONTROLLERS[1].1, CONTROLLERS[1].2)),
        Mutex::new(AtaDevice::new(CONTROLLERS[2].0, CONTROLLERS[2].1, CONTROLLERS[2].2)),
        Mutex::new(AtaDevice::new(CONTROLLERS[3].0, CONTROLLERS[3].1, CONTROLLERS[3].2)),
    ];
}

/// Index by `/dev/hd{a,b,c,d}` letter offset (0 for `hda`, 3 for `hdd`).
pub fn device(index: usize) -> Option<&'static Mutex<AtaDevice>> {
    DEVICES.get(index)
}

pub fn init() {
    for (i, dev) in DEVICES.iter().enumerate() {
        if dev.lock().identify().is_ok() {
            crate::log_info!("ATA PIO: /dev/{} detected.", DEVICE_NAMES[i]);
        } else {
            crate::log_warn!("ATA PIO: /dev/{} not present.", DEVICE_NAMES[i]);
        }
    }
}
