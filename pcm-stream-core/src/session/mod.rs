pub mod capture;
pub mod device;
pub mod playback;
pub mod thread;
