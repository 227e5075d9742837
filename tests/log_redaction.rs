//! PINs given in URIs never end up in the log.

mod common;

use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record};
use p11store::{
    secret::NoPrompt,
    token::memory::{MemoryLoader, MemoryToken},
};

use common::{MODULE, Usage};

const SECRET_PIN: &str = "s3cretPIN";

struct CaptureLog {
    lines: Mutex<Vec<String>>,
}

impl Log for CaptureLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = format!("{} {}", record.target(), record.args());
        self.lines
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(line);
    }

    fn flush(&self) {}
}

static CAPTURE: CaptureLog = CaptureLog {
    lines: Mutex::new(Vec::new()),
};

#[test]
fn pin_value_is_never_logged() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let token = MemoryToken::new(0, "log token").user_pin(SECRET_PIN);
    let token = common::with_identity(
        token,
        b"\x01",
        "test",
        common::cert("test", "Test CA", Usage::Client),
    );
    let engine = common::engine(MemoryLoader::new(MODULE).with_token(token));
    let with_pin = |uri: &str| format!("{};pin-value={}", uri, SECRET_PIN);

    engine
        .load_private_key(&with_pin("pkcs11:object=test"), &NoPrompt)
        .unwrap();
    engine
        .load_public_key(&with_pin("pkcs11:id=%01"), &NoPrompt)
        .unwrap();
    engine
        .load_certificate(&with_pin("pkcs11:object=test"))
        .unwrap();
    assert!(
        engine
            .load_private_key(&with_pin("pkcs11:object=missing"), &NoPrompt)
            .is_err()
    );
    let store = engine.open_store(&with_pin("pkcs11:"), &NoPrompt).unwrap();
    assert_eq!(store.count(), 3);

    let lines = CAPTURE.lines.lock().unwrap();
    assert!(lines.iter().any(|line| line.contains("Private key \"test\"")));
    let leaked: Vec<_> =
        lines.iter().filter(|line| line.contains(SECRET_PIN)).collect();
    assert!(leaked.is_empty(), "PIN in log: {:?}", leaked);
}
