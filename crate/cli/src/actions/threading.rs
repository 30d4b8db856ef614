use std::{
    io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use clap::Parser;
use cosmian_pkcs11_sys::{CKA_CLASS, CKA_KEY_TYPE, CKA_LABEL, CKK_DES3, CKO_SECRET_KEY};
use luna_base_hsm::{LockingModel, Mechanism, Template};
use luna_pkcs11_loader::Luna;
use tracing::{error, info};

use crate::{
    actions::open_user_session,
    error::result::{SampleResult, SampleResultHelper},
    sample_error,
};

const DATA: &[u8] = b"This is 16 Bytes";

/// Encrypt from several threads, each with its own session
///
/// The workers encrypt with the triple DES key named `--key-name` until the
/// duration elapses, or until the enter key is pressed when no duration is
/// given.
#[derive(Parser, Debug)]
#[clap(verbatim_doc_comment)]
pub struct ThreadingAction {
    /// Number of threads to start
    #[clap(long = "num-threads", short = 'n', value_parser = clap::value_parser!(u16).range(1..))]
    pub num_threads: u16,

    /// Name of the triple DES key to use
    #[clap(long = "key-name", short = 'k')]
    pub key_name: String,

    /// Locking model given to the library: none, os or functions
    #[clap(long, short = 'l')]
    pub locking: LockingModel,

    /// Execution time, in seconds
    #[clap(long, short = 'd')]
    pub duration: Option<u64>,

    /// The user PIN of the slot
    #[clap(long = "user-pin", short = 'p')]
    pub user_pin: Option<String>,

    /// The slot to use
    #[clap(long, short = 's', default_value_t = 0)]
    pub slot: usize,

    /// Trace every call made by the workers
    #[clap(short = 'v', long)]
    pub verbose: bool,
}

impl ThreadingAction {
    pub fn run(&self, pkcs11_lib: &Path) -> SampleResult<()> {
        let hsm = Luna::instantiate(pkcs11_lib, self.locking)?;
        info!("library initialized with the {} locking model", self.locking);

        // keeps the user logged in while the workers run
        let session = open_user_session(&hsm, self.slot, self.user_pin.as_deref())?;
        let key = session
            .find_first_object(
                &Template::new()
                    .ulong(CKA_CLASS, CKO_SECRET_KEY)
                    .ulong(CKA_KEY_TYPE, CKK_DES3)
                    .bytes(CKA_LABEL, self.key_name.as_str()),
            )?
            .with_context(|| format!("des3 key ({}) not found", self.key_name))?;
        let slot = hsm.get_slot(self.slot)?;
        let verbose = self.verbose;

        println!("Starting {} threads", self.num_threads);
        let pool = WorkerPool::start(usize::from(self.num_threads), move |name, stop| {
            if verbose {
                println!("{name} openSession");
            }
            let worker_session = slot.open_session(true)?;
            let mut encryptions = 0_u64;
            while !stop.load(Ordering::SeqCst) {
                if verbose {
                    println!("{name} encryptInit");
                    println!("{name} encrypt");
                }
                worker_session.encrypt(key, Mechanism::Des3Ecb, DATA)?;
                encryptions += 1;
            }
            worker_session.close()?;
            Ok(encryptions)
        })?;

        match self.duration {
            None => {
                println!("Press enter key to end.");
                io::stdin().read_line(&mut String::new())?;
            }
            Some(1) => {
                println!("Running for one second.");
                thread::sleep(Duration::from_secs(1));
            }
            Some(seconds) => {
                println!("Running for {seconds} seconds.");
                thread::sleep(Duration::from_secs(seconds));
            }
        }

        println!("Waiting for threads to terminate");
        let reports = pool.stop();

        let mut first_failure = None;
        for (name, outcome) in reports {
            match outcome {
                Ok(encryptions) => println!("{name} performed {encryptions} encryptions"),
                Err(e) => {
                    error!("{name} failed: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }
        session.close()?;
        first_failure.map_or(Ok(()), Err)
    }
}

/// Prints `<name> terminated` when the worker ends, whether it returns,
/// fails or panics
struct TerminationNotice<'a>(&'a str);

impl Drop for TerminationNotice<'_> {
    fn drop(&mut self) {
        println!("{} terminated", self.0);
    }
}

/// Workers sharing a termination flag
pub(crate) struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<SampleResult<u64>>>,
}

impl WorkerPool {
    /// Spawn `count` threads named `Thread-<n>`, each running `work` until
    /// it returns. `work` is expected to poll the flag it receives.
    pub(crate) fn start<F>(count: usize, work: F) -> SampleResult<Self>
    where
        F: Fn(&str, &AtomicBool) -> SampleResult<u64> + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let work = Arc::new(work);
        let handles = (0..count)
            .map(|i| {
                let name = format!("Thread-{i}");
                let stop = stop.clone();
                let work = work.clone();
                thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || {
                        let _notice = TerminationNotice(&name);
                        work(&name, &stop)
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stop, handles })
    }

    /// Raise the termination flag and join every worker, in start order.
    /// A panicked worker is reported as a failure.
    pub(crate) fn stop(self) -> Vec<(String, SampleResult<u64>)> {
        self.stop.store(true, Ordering::SeqCst);
        self.handles
            .into_iter()
            .map(|handle| {
                let name = handle.thread().name().unwrap_or("worker").to_owned();
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(sample_error!("{name} panicked")));
                (name, outcome)
            })
            .collect()
    }
}
