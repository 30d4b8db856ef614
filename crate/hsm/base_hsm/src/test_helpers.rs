use std::env;

use zeroize::Zeroizing;

use crate::{HError, HResult};

pub fn get_hsm_password() -> HResult<Zeroizing<String>> {
    let user_password = env::var("HSM_USER_PASSWORD").map_err(|_| {
        HError::Default(
            "The user password for the HSM is not set. Please set the HSM_USER_PASSWORD \
             environment variable"
                .to_owned(),
        )
    })?;
    Ok(Zeroizing::new(user_password))
}

pub fn get_hsm_slot_id() -> HResult<usize> {
    let slot_id = env::var("HSM_SLOT_ID").map_err(|_| {
        HError::Default("The HSM_SLOT_ID environment variable is not set".to_owned())
    })?;
    slot_id
        .parse::<usize>()
        .map_err(|e| HError::Default(format!("HSM_SLOT_ID is not a slot number: {e}")))
}

/// The PKCS#11 library path from the `env_var` variable, or `default`
#[must_use]
pub fn lib_path(env_var: &str, default: &str) -> String {
    env::var(env_var).unwrap_or_else(|_| default.to_owned())
}
