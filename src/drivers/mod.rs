pub mod ata;

pub fn init() {
    ata::init();
    crate::log_info!("Drivers subsystem initialized.");
}
