//! Various crate-wide constants.


//------------ Engine Identity ----------------------------------------------

/// The identifier the engine is registered under.
pub const ENGINE_ID: &str = "pkcs11";

/// The human readable name of the engine.
pub const ENGINE_NAME: &str = "PKCS#11 engine";

/// The friendly name of the `p11store` binary.
pub const P11STORE_APP: &str = "PKCS#11 Store Tool";

/// The URI scheme handled by the engine, including the colon.
pub const PKCS11_SCHEME: &str = "pkcs11:";


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const P11STORE_DEFAULT_CONFIG_FILE: &str = "/etc/p11store.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable with the path to the PKCS#11 module.
///
/// It is only consulted when neither the URI nor the engine configuration
/// provide a module path.
pub const PKCS11_ENV_MODULE_PATH: &str = "PKCS11_MODULE_PATH";

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “warn.”
pub const P11STORE_ENV_LOG_LEVEL: &str = "P11STORE_LOG_LEVEL";

/// The environment variable with the log target.
///
/// The variable should contain the name of a
/// [`LogType`][crate::config::LogType]. It will be overwritten by the
/// config file. The default is “stderr.”
pub const P11STORE_ENV_LOG_TYPE: &str = "P11STORE_LOG_TYPE";


//------------ Token Field Widths -------------------------------------------

/// Width of the token label and manufacturer id fields.
pub const TOKEN_LABEL_LEN: usize = 32;

/// Width of the token model and serial number fields.
pub const TOKEN_MODEL_LEN: usize = 16;


//------------ Secrets ------------------------------------------------------

/// The text shown when interactively asking for a PIN.
pub const PIN_PROMPT: &str = "Enter PIN for Token: ";

/// The longest PIN accepted from an interactive prompt.
pub const PIN_PROMPT_MAX_LEN: usize = 511;

/// The most bytes taken from a `pin-source` file.
pub const PIN_FILE_MAX_LEN: usize = 255;
