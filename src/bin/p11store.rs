//! Inspect PKCS#11 tokens through `pkcs11:` URIs.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    process,
};

use clap::Parser;
use log::error;
use openssl::{
    error::ErrorStack,
    x509::{X509, X509Name},
};
use p11store::{
    config::{Config, ConfigError},
    constants::{P11STORE_APP, P11STORE_DEFAULT_CONFIG_FILE},
    engine::Pkcs11Engine,
    error::Error,
    secret::ConsolePrompt,
    store::StoreInfo,
    token::{KeyMaterial, TokenKey, cryptoki::CryptokiLoader},
};


//------------ Options -------------------------------------------------------

/// The command line options.
#[derive(clap::Parser)]
#[command(version, about = P11STORE_APP)]
struct Options {
    /// Path to the config file
    #[arg(short, long, value_name = "path")]
    config: Option<PathBuf>,

    /// Path to the PKCS#11 module used when a URI names none
    #[arg(short, long, value_name = "path")]
    module: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// List the objects on a token
    List {
        /// The URI of the token or objects
        #[arg(default_value = "pkcs11:")]
        uri: String,
    },

    /// Load a key and show a summary
    Key {
        uri: String,

        /// Load the public rather than the private key
        #[arg(long)]
        public: bool,
    },

    /// Load a certificate and print it as PEM
    Cert { uri: String },

    /// Select a certificate and key for TLS client authentication
    ClientCert {
        /// File with a certificate whose subject is an acceptable issuer
        #[arg(long, value_name = "path")]
        issuer: Vec<PathBuf>,
    },
}

impl Command {
    fn run(self, engine: &Pkcs11Engine) -> Result<(), CliError> {
        match self {
            Command::List { uri } => {
                let store = engine.open_store(&uri, &ConsolePrompt)?;
                for item in store {
                    match item {
                        Ok(StoreInfo::Name { name, description }) => {
                            println!("{}\t{}", name, description)
                        }
                        Ok(info) => println!("{}", info),
                        Err(err) => error!("{}", err),
                    }
                }
                Ok(())
            }
            Command::Key { uri, public } => {
                let key = if public {
                    engine.load_public_key(&uri, &ConsolePrompt)?
                } else {
                    engine.load_private_key(&uri, &ConsolePrompt)?
                };
                print_key(&key)
            }
            Command::Cert { uri } => {
                print_cert(&engine.load_certificate(&uri)?)
            }
            Command::ClientCert { issuer } => {
                let issuers = issuer
                    .iter()
                    .map(|path| read_subject(path))
                    .collect::<Result<Vec<_>, _>>()?;
                let (cert, key) =
                    engine.select_client_certificate(&issuers, &ConsolePrompt)?;
                print_key(&key)?;
                print_cert(&cert)
            }
        }
    }
}


//------------ Output --------------------------------------------------------

fn print_key(key: &TokenKey) -> Result<(), CliError> {
    println!("Class: {}", key.class());
    println!("Label: {}", String::from_utf8_lossy(key.label()));
    println!("Id:    {}", hex::encode(key.id()));
    println!("Type:  {}", key.material().key_type());
    match key.material() {
        KeyMaterial::Rsa(public) => {
            print!("{}", String::from_utf8_lossy(&public.public_key_to_pem()?))
        }
        KeyMaterial::Ec { params, point } => {
            println!("Params: {}", hex::encode(params));
            println!("Point:  {}", hex::encode(point));
        }
        KeyMaterial::Unavailable => {}
    }
    Ok(())
}

fn print_cert(cert: &X509) -> Result<(), CliError> {
    print!("{}", String::from_utf8_lossy(&cert.to_pem()?));
    Ok(())
}

/// Reads a PEM or DER certificate and returns its subject.
fn read_subject(path: &Path) -> Result<X509Name, CliError> {
    let data =
        fs::read(path).map_err(|err| CliError::Read(path.into(), err))?;
    let cert = X509::from_pem(&data).or_else(|_| X509::from_der(&data))?;
    Ok(X509Name::from_der(&cert.subject_name().to_der()?)?)
}


//------------ CliError ------------------------------------------------------

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Read(PathBuf, io::Error),
    Resolve(Error),
    OpenSsl(ErrorStack),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Read(path, e) => {
                write!(f, "Cannot read '{}': {}", path.display(), e)
            }
            CliError::Resolve(e) => e.fmt(f),
            CliError::OpenSsl(e) => write!(f, "OpenSSL error: {}", e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<Error> for CliError {
    fn from(e: Error) -> Self {
        CliError::Resolve(e)
    }
}

impl From<ErrorStack> for CliError {
    fn from(e: ErrorStack) -> Self {
        CliError::OpenSsl(e)
    }
}


//------------ main ----------------------------------------------------------

fn load_config(options: &Options) -> Result<Config, CliError> {
    let mut config = match options.config.as_ref() {
        Some(path) => Config::read_config(path)?,
        None => {
            let path = PathBuf::from(P11STORE_DEFAULT_CONFIG_FILE);
            if path.exists() {
                Config::read_config(&path)?
            } else {
                Config::default()
            }
        }
    };
    if let Some(module) = options.module.as_ref() {
        config.module_path = Some(module.clone());
    }
    Ok(config)
}

fn run(options: Options) -> Result<(), CliError> {
    let config = load_config(&options)?;
    config.init_logging()?;
    let engine = Pkcs11Engine::from_config(CryptokiLoader, &config);
    options.command.run(&engine)
}

fn main() {
    if let Err(err) = run(Options::parse()) {
        eprintln!("{}", err);
        process::exit(1);
    }
}
