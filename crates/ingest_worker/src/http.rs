mod device_directory_client;

pub use device_directory_client::*;
