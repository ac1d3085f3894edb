pub mod preferences;

pub use preferences::{
    BackendPreferences, LoggingPreferences, Preferences, PreferencesError, PreferencesStore,
    WorkspacePreferences, DEFAULT_BACKEND_PORT,
};
