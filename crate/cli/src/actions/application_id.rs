//! Login state shared between processes through a Luna application ID.
//!
//! The parent logs in under an application ID and keeps the ID open after
//! finalizing the library: a child process using the same ID finds the user
//! logged in. Once the parent closes the ID, the child no longer does.

use std::{
    env,
    path::Path,
    process::{Command, Stdio},
};

use clap::Parser;
use cosmian_pkcs11_sys::{CK_ULONG, CKS_RW_USER_FUNCTIONS};
use luna_base_hsm::ApplicationId;
use tracing::debug;

use crate::{
    actions::{load_hsm, open_user_session},
    error::result::SampleResult,
    sample_ensure,
};

const CHILD_PREFIX: &str = "Child:: ";

/// Share a login with a child process through an application ID
#[derive(Parser, Debug)]
pub struct ApplicationIdAction {
    /// The slot to log into
    #[clap(long, short = 's', default_value_t = 1)]
    pub slot: usize,

    /// Major part of the application ID
    #[clap(long, default_value_t = 1)]
    pub major: u32,

    /// Minor part of the application ID
    #[clap(long, default_value_t = 1)]
    pub minor: u32,

    /// User password for the slot
    #[clap(long, short = 'p')]
    pub password: String,
}

impl ApplicationIdAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let id = application_id(self.major, self.minor);

        let hsm = load_hsm(pkcs11_lib)?;
        hsm.set_application_id(id)?;
        hsm.open_application_id(self.slot, id)?;
        let session = open_user_session(&hsm, self.slot, Some(&self.password))?;
        let info = session.get_session_info()?;
        if info.state == CKS_RW_USER_FUNCTIONS {
            println!("Parent:: Logged in to slot  {}", info.slot_id);
        }
        session.close_keep_login()?;
        drop(session);
        // finalizes the library, the application ID stays open on the HSM
        drop(hsm);
        println!("Parent:: Logged out (application ID session open)");

        run_child(pkcs11_lib, self.slot, self.major, self.minor)?;

        let hsm = load_hsm(pkcs11_lib)?;
        hsm.close_application_id(self.slot, id)?;
        println!("Parent:: Application ID session closed");
        drop(hsm);

        run_child(pkcs11_lib, self.slot, self.major, self.minor)
    }
}

/// Report whether a session opened under an application ID is logged in
///
/// Started by `application-id`.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct ChildApplicationIdAction {
    /// The slot to check
    #[clap(long, short = 's', default_value_t = 1)]
    pub slot: usize,

    /// Major part of the application ID
    #[clap(long, default_value_t = 1)]
    pub major: u32,

    /// Minor part of the application ID
    #[clap(long, default_value_t = 1)]
    pub minor: u32,
}

impl ChildApplicationIdAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = load_hsm(pkcs11_lib)?;
        hsm.set_application_id(application_id(self.major, self.minor))?;
        let session = hsm.get_slot(self.slot)?.open_session(true)?;
        let info = session.get_session_info()?;
        debug!("child session state: {}", info.state_name());
        if info.user_logged_in() {
            println!("logged in to slot {}", info.slot_id);
        } else {
            println!("user not logged in");
        }
        session.close()?;
        Ok(())
    }
}

fn application_id(major: u32, minor: u32) -> ApplicationId {
    ApplicationId {
        major: CK_ULONG::from(major),
        minor: CK_ULONG::from(minor),
    }
}

/// Run `child-application-id` in a new process of this executable and echo
/// its output
fn run_child(pkcs11_lib: &Path, slot: usize, major: u32, minor: u32) -> SampleResult<()> {
    println!();
    let output = Command::new(env::current_exe()?)
        .arg("--pkcs11-lib")
        .arg(pkcs11_lib)
        .arg("child-application-id")
        .args(["--slot", &slot.to_string()])
        .args(["--major", &major.to_string()])
        .args(["--minor", &minor.to_string()])
        .stderr(Stdio::inherit())
        .output()?;
    print!(
        "{}",
        prefix_lines(&String::from_utf8_lossy(&output.stdout), CHILD_PREFIX)
    );
    println!();
    sample_ensure!(
        output.status.success(),
        "the child process failed: {}",
        output.status
    );
    Ok(())
}

fn prefix_lines(text: &str, prefix: &str) -> String {
    text.lines().map(|line| format!("{prefix}{line}\n")).collect()
}
