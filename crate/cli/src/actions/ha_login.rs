use std::path::Path;

use clap::Parser;
use cosmian_pkcs11_sys::{CKA_CLASS, CKA_LABEL, CKF_RW_SESSION, CKO_PRIVATE_KEY, CKU_SO};
use luna_base_hsm::{CKF_SO_SESSION, Template};
use tracing::debug;

use crate::{
    actions::load_hsm,
    error::result::{SampleResult, SampleResultHelper},
};

/// Log the SO into a target HSM with a login key held by a source HSM
///
/// The target issues a challenge encrypted for the source token wrapping
/// certificate, the source answers it with the login key and the answer
/// logs the target session in.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct HaLoginAction {
    /// Primary slot, holding the login key
    #[clap(long, default_value_t = 1)]
    pub source: usize,

    /// Slot to log into
    #[clap(long, default_value_t = 2)]
    pub target: usize,

    /// Label of the login key
    #[clap(long = "key-name", short = 'k')]
    pub key_name: String,

    /// SO password of the source slot; omit it for a PED login
    #[clap(long, short = 'p')]
    pub password: Option<String>,
}

impl HaLoginAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;

        let source_session = hsm
            .get_slot(self.source)?
            .open_session_with_flags(CKF_RW_SESSION | CKF_SO_SESSION)?;
        source_session.login(CKU_SO, self.password.as_deref().map(str::as_bytes))?;
        let login_key = source_session
            .find_first_object(&login_key_template(&self.key_name))?
            .with_context(|| format!("login key ({}) not found", self.key_name))?;

        let token_wrapping_cert = hsm.ha_get_master_public(self.source)?;
        debug!(
            "token wrapping certificate of slot {}: {} bytes",
            self.source,
            token_wrapping_cert.len()
        );

        let target_session = hsm
            .get_slot(self.target)?
            .open_session_with_flags(CKF_RW_SESSION | CKF_SO_SESSION)?;
        let challenge = target_session.ha_get_login_challenge(CKU_SO, &token_wrapping_cert)?;
        let encrypted_pin = source_session.ha_answer_login_challenge(login_key, &challenge)?;
        target_session.ha_login(&encrypted_pin)?;

        let info = target_session.get_session_info()?;
        debug!("target session state: {}", info.state_name());
        println!("Target session state = {}", info.state);

        target_session.close()?;
        source_session.close()?;
        Ok(())
    }
}

/// The login key is the first private key carrying the label
fn login_key_template(label: &str) -> Template {
    Template::new()
        .ulong(CKA_CLASS, CKO_PRIVATE_KEY)
        .bytes(CKA_LABEL, label)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use cosmian_pkcs11_sys::{CKA_CLASS, CKA_LABEL, CKO_PRIVATE_KEY};

    use super::{HaLoginAction, login_key_template};

    #[test]
    fn test_login_key_is_a_private_key() {
        let template = login_key_template("loginkey");
        assert_eq!(
            template.get(CKA_CLASS),
            Some(CKO_PRIVATE_KEY.to_ne_bytes().as_slice())
        );
        assert_eq!(template.get(CKA_LABEL), Some(b"loginkey".as_slice()));
        assert_eq!(template.len(), 2);
    }

    #[test]
    fn test_parse() {
        let action = HaLoginAction::try_parse_from(["ha-login", "-k", "loginkey"]).unwrap();
        assert_eq!((action.source, action.target), (1, 2));
        assert!(action.password.is_none());
        assert!(HaLoginAction::try_parse_from(["ha-login", "--source", "3"]).is_err());
    }
}
