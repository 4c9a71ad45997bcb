mod settings;

pub use settings::ManagerConfig;
