mod bus_options;
mod subscriber;

pub use bus_options::*;
pub use subscriber::BusSubscriber;
