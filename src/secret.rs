//! Obtaining the PIN used to log in to a token.
//!
//! A PIN can come from four places, tried in this order:
//!
//! 1. the `pin-value` attribute of the URI,
//! 2. the first line of the file named by a `pin-source=file:` attribute,
//! 3. a PIN configured on the engine before the URI was parsed,
//! 4. an interactive prompt.
//!
//! The first source that provides a PIN wins and later sources are not
//! looked at. In particular, a PIN file is never read when the URI carries
//! a literal PIN. Prompting only happens when a PIN is actually needed,
//! which is decided by the caller through a [`SecretRequirement`].

use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};

use log::{debug, trace};
use secrecy::{ExposeSecret, SecretVec};

use crate::{
    constants::{PIN_FILE_MAX_LEN, PIN_PROMPT, PIN_PROMPT_MAX_LEN},
    error::Error,
    uri::{PinSource, SelectionCriteria},
};


//------------ Secret --------------------------------------------------------

/// A PIN or other authentication secret.
///
/// The content is wiped from memory when dropped and never shows up in
/// debug output.
pub struct Secret(SecretVec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Secret(SecretVec::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    /// Returns an independent copy of the secret.
    pub fn duplicate(&self) -> Self {
        Secret::new(self.expose().to_vec())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret::new(s.as_bytes().to_vec())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret::new(s.into_bytes())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}


//------------ SecretRequirement ---------------------------------------------

/// How badly an operation needs a PIN.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecretRequirement {
    /// Login is required. Prompt if no other source has a PIN.
    Required,

    /// Log in if a PIN is available but never prompt.
    IfAvailable,

    /// Don't log in. No source is consulted at all.
    NotNeeded,
}


//------------ PinPrompt -----------------------------------------------------

/// Asks the user for a PIN.
pub trait PinPrompt {
    /// Shows `prompt` and returns the entered PIN.
    ///
    /// Returns `Ok(None)` if the user cancelled.
    fn prompt_pin(&self, prompt: &str) -> Result<Option<Secret>, io::Error>;
}

impl<F> PinPrompt for F
where
    F: Fn(&str) -> Option<String>,
{
    fn prompt_pin(&self, prompt: &str) -> Result<Option<Secret>, io::Error> {
        Ok(self(prompt).map(Secret::from))
    }
}

/// Prompts for the PIN on the controlling terminal without echo.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsolePrompt;

impl PinPrompt for ConsolePrompt {
    fn prompt_pin(&self, prompt: &str) -> Result<Option<Secret>, io::Error> {
        rpassword::prompt_password(prompt).map(|pin| Some(Secret::from(pin)))
    }
}

/// Never provides a PIN, for non-interactive use.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPrompt;

impl PinPrompt for NoPrompt {
    fn prompt_pin(&self, _prompt: &str) -> Result<Option<Secret>, io::Error> {
        Ok(None)
    }
}


//------------ Resolution ----------------------------------------------------

/// Determines the PIN for logging in.
///
/// Returns `Ok(None)` if no login should happen. The `preset` PIN is the
/// one configured on the engine.
pub fn resolve_secret(
    criteria: &SelectionCriteria,
    preset: Option<&Secret>,
    requirement: SecretRequirement,
    prompt: &dyn PinPrompt,
) -> Result<Option<Secret>, Error> {
    if requirement == SecretRequirement::NotNeeded {
        trace!("PKCS#11: no PIN needed");
        return Ok(None);
    }

    if let Some(pin) = criteria.pin.as_ref() {
        debug!("PKCS#11: using PIN from URI");
        return Ok(Some(pin.duplicate()));
    }

    if let Some(PinSource::File(path)) = criteria.pin_source.as_ref() {
        debug!("PKCS#11: reading PIN from '{}'", path.display());
        let line = read_first_line(path).map_err(|err| {
            Error::SecretUnavailable(format!(
                "cannot read PIN file '{}': {}",
                path.display(),
                err
            ))
        })?;
        return Ok(Some(line));
    }

    if let Some(pin) = preset {
        debug!("PKCS#11: using configured PIN");
        return Ok(Some(pin.duplicate()));
    }

    if requirement == SecretRequirement::IfAvailable {
        trace!("PKCS#11: no PIN available, continuing without login");
        return Ok(None);
    }

    debug!("PKCS#11: prompting for PIN");
    match prompt.prompt_pin(PIN_PROMPT) {
        Ok(Some(pin)) if pin.expose().len() > PIN_PROMPT_MAX_LEN => {
            Err(Error::SecretUnavailable(format!(
                "PIN longer than {} bytes",
                PIN_PROMPT_MAX_LEN
            )))
        }
        Ok(Some(pin)) => Ok(Some(pin)),
        Ok(None) => Err(Error::SecretUnavailable(
            "PIN entry cancelled".to_string(),
        )),
        Err(err) => Err(Error::SecretUnavailable(format!(
            "PIN entry failed: {}",
            err
        ))),
    }
}

/// Reads the first line of a file, without the line terminator.
///
/// At most the first 255 bytes of the file are considered.
pub fn read_first_line(path: &Path) -> Result<Secret, io::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file.take(PIN_FILE_MAX_LEN as u64));
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(Secret::new(line))
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::{cell::Cell, fs, path::PathBuf};

    use crate::uri::ParseContext;

    use super::*;

    fn criteria(uri: &str) -> SelectionCriteria {
        SelectionCriteria::parse_with_fallback(
            uri,
            ParseContext::Listing,
            Some(PathBuf::from("/usr/lib/p11.so")),
        )
        .unwrap()
    }

    /// A prompt that answers with a fixed PIN and counts its calls.
    struct CountingPrompt {
        answer: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl CountingPrompt {
        fn new(answer: Option<&'static str>) -> Self {
            CountingPrompt {
                answer,
                calls: Cell::new(0),
            }
        }
    }

    impl PinPrompt for CountingPrompt {
        fn prompt_pin(&self, prompt: &str) -> Result<Option<Secret>, io::Error> {
            assert_eq!(prompt, PIN_PROMPT);
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer.map(Secret::from))
        }
    }

    fn resolve(
        uri: &str,
        preset: Option<&Secret>,
        requirement: SecretRequirement,
        prompt: &dyn PinPrompt,
    ) -> Result<Option<Vec<u8>>, Error> {
        resolve_secret(&criteria(uri), preset, requirement, prompt)
            .map(|pin| pin.map(|pin| pin.expose().to_vec()))
    }

    #[test]
    fn literal_pin_wins_and_file_is_not_read() {
        let prompt = CountingPrompt::new(Some("prompted"));
        let pin = resolve(
            "pkcs11:pin-source=file:/does/not/exist;pin-value=1234",
            Some(&Secret::from("preset")),
            SecretRequirement::Required,
            &prompt,
        )
        .unwrap();
        assert_eq!(pin.as_deref(), Some(&b"1234"[..]));
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn file_beats_preset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pin.txt");
        fs::write(&path, "5678\nsecond line\n").unwrap();

        let pin = resolve(
            &format!("pkcs11:pin-source=file:{}", path.display()),
            Some(&Secret::from("preset")),
            SecretRequirement::Required,
            &NoPrompt,
        )
        .unwrap();
        assert_eq!(pin.as_deref(), Some(&b"5678"[..]));
    }

    #[test]
    fn unreadable_file_is_secret_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let res = resolve(
            &format!("pkcs11:pin-source=file:{}", path.display()),
            None,
            SecretRequirement::Required,
            &NoPrompt,
        );
        assert!(matches!(res, Err(Error::SecretUnavailable(_))));
    }

    #[test]
    fn preset_beats_prompt() {
        let prompt = CountingPrompt::new(Some("prompted"));
        let pin = resolve(
            "pkcs11:object=k",
            Some(&Secret::from("preset")),
            SecretRequirement::Required,
            &prompt,
        )
        .unwrap();
        assert_eq!(pin.as_deref(), Some(&b"preset"[..]));
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn prompts_when_required() {
        let prompt = CountingPrompt::new(Some("prompted"));
        let pin = resolve(
            "pkcs11:object=k",
            None,
            SecretRequirement::Required,
            &prompt,
        )
        .unwrap();
        assert_eq!(pin.as_deref(), Some(&b"prompted"[..]));
        assert_eq!(prompt.calls.get(), 1);
    }

    #[test]
    fn cancelled_prompt_is_secret_unavailable() {
        let prompt = CountingPrompt::new(None);
        let res = resolve(
            "pkcs11:object=k",
            None,
            SecretRequirement::Required,
            &prompt,
        );
        assert!(matches!(res, Err(Error::SecretUnavailable(_))));
        assert_eq!(prompt.calls.get(), 1);
    }

    #[test]
    fn overlong_prompted_pin_is_rejected() {
        let long = "1".repeat(PIN_PROMPT_MAX_LEN + 1);
        let prompt = move |_: &str| Some(long.clone());
        let res = resolve(
            "pkcs11:object=k",
            None,
            SecretRequirement::Required,
            &prompt,
        );
        assert!(matches!(res, Err(Error::SecretUnavailable(_))));
    }

    #[test]
    fn optional_never_prompts() {
        let prompt = CountingPrompt::new(Some("prompted"));
        let pin = resolve(
            "pkcs11:object=k",
            None,
            SecretRequirement::IfAvailable,
            &prompt,
        )
        .unwrap();
        assert!(pin.is_none());
        assert_eq!(prompt.calls.get(), 0);

        let pin = resolve(
            "pkcs11:object=k;pin-value=1",
            None,
            SecretRequirement::IfAvailable,
            &prompt,
        )
        .unwrap();
        assert_eq!(pin.as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn not_needed_ignores_all_sources() {
        let prompt = CountingPrompt::new(Some("prompted"));
        let pin = resolve(
            "pkcs11:pin-value=1;pin-source=file:/does/not/exist",
            Some(&Secret::from("preset")),
            SecretRequirement::NotNeeded,
            &prompt,
        )
        .unwrap();
        assert!(pin.is_none());
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn first_line_is_trimmed_and_bounded() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("crlf.txt");
        fs::write(&path, "abcd\r\nefgh").unwrap();
        assert_eq!(read_first_line(&path).unwrap().expose(), b"abcd");

        let path = dir.path().join("no-newline.txt");
        fs::write(&path, "abcd").unwrap();
        assert_eq!(read_first_line(&path).unwrap().expose(), b"abcd");

        let path = dir.path().join("long.txt");
        fs::write(&path, "x".repeat(300)).unwrap();
        assert_eq!(read_first_line(&path).unwrap().expose().len(), 255);
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = Secret::from("1234");
        assert_eq!(format!("{:?}", secret), "Secret([REDACTED])");
    }
}
