mod config;

use std::{path::PathBuf, time::Duration};

use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use nixvm_http::{HttpClient, HttpError};
use nixvm_provision::{
    HdiutilMounter, ImageSources, ImagesListError, ProvisionError,
    ProvisionOptions, Provisioner, PullPolicy,
};
use nixvm_system::{Arch, CpuCount, DiskSize, MemorySize, SizeError};
use thiserror::Error;
use tracing::info;

pub use crate::config::{Config, ConfigError, ImagesConfig};

#[derive(Parser, Debug)]
#[command(name = "nixvm", version, about = "Provision a NixOS guest for a local VM runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file, or a directory containing nixvm.toml.
    #[arg(long = "config", global = true, env = "NIXVM_CONFIG")]
    pub config_path: Option<PathBuf>,

    #[arg(long = "log", global = true, default_value = "info")]
    pub log: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the install CD and write a script that boots it
    Installer {
        #[command(flatten)]
        args: ProvisionArgs,
    },
    /// Write vm.conf for booting the installed system
    Config {
        #[command(flatten)]
        args: ProvisionArgs,
    },
    /// Prepare the installer, run the install helper, then write vm.conf
    Provision {
        #[command(flatten)]
        args: ProvisionArgs,

        /// Program that drives the interactive NixOS installer
        #[arg(long = "installer-helper")]
        installer_helper: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullArg {
    /// Always download the install CD
    Always,
    /// Reuse an install CD already in the work dir
    Missing,
}

impl From<PullArg> for PullPolicy {
    fn from(value: PullArg) -> Self {
        match value {
            PullArg::Always => PullPolicy::Always,
            PullArg::Missing => PullPolicy::Missing,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ProvisionArgs {
    /// Directory for the ISO, kernel, initrd, disk and launcher
    #[arg(long = "work-dir")]
    pub work_dir: Option<PathBuf>,

    /// Host architecture identifier (defaults to this machine's)
    #[arg(long = "arch")]
    pub arch: Option<String>,

    /// VM runtime binary invoked by the install script
    #[arg(long = "runtime")]
    pub runtime: Option<String>,

    /// Disk image size in GiB
    #[arg(long = "disk-size")]
    pub disk_size_gib: Option<u64>,

    #[arg(long = "cpu-count")]
    pub cpu_count: Option<u16>,

    /// Guest memory, e.g. "4 GiB"
    #[arg(long = "memory-size")]
    pub memory_size: Option<ByteSize>,

    #[arg(long = "pull", value_enum)]
    pub pull: Option<PullArg>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Images(#[from] ImagesListError),

    #[error("invalid VM size: {0}")]
    InvalidSize(#[from] SizeError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Flags beat the config file, which beats built-in defaults. Sizes that
/// would render an unbootable launcher are rejected here.
pub fn provision_options(
    config: &Config,
    args: &ProvisionArgs,
) -> Result<ProvisionOptions, AppError> {
    let mut images = ImageSources::builtin()?;
    if let Some(url) = &config.images.intel {
        images = images.with_url(Arch::Intel, url.clone());
    }
    if let Some(url) = &config.images.arm {
        images = images.with_url(Arch::Arm, url.clone());
    }

    let mut options = ProvisionOptions::new(images);
    if let Some(work_dir) = args.work_dir.clone().or_else(|| config.work_dir.clone()) {
        options.work_dir = work_dir;
    }
    if let Some(arch) = args.arch.clone().or_else(|| config.arch.clone()) {
        options.arch = arch;
    }
    if let Some(runtime) = args.runtime.clone().or_else(|| config.runtime.clone()) {
        options.runtime = runtime;
    }
    if let Some(gib) = args.disk_size_gib.or(config.disk_size_gib) {
        options.disk_size = DiskSize::try_from_gib(gib)?;
    }
    if let Some(count) = args.cpu_count.or(config.cpu_count) {
        options.cpu_count = CpuCount::try_new(count)?;
    }
    if let Some(size) = args.memory_size.or(config.memory_size) {
        options.memory_size = MemorySize::try_new(size)?;
    }
    if let Some(pull) = args.pull.map(PullPolicy::from).or(config.pull) {
        options.pull = pull;
    }
    Ok(options)
}

fn mounter(config: &Config) -> HdiutilMounter {
    let mounter = HdiutilMounter::default();
    match config.settle_delay_ms {
        Some(ms) => mounter.with_settle_delay(Duration::from_millis(ms)),
        None => mounter,
    }
}

fn download_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.green/black}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    bar.set_message("Downloading ISO");
    bar
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = Config::locate(cli.config_path.as_deref()).await?;
    match cli.command {
        Command::Installer { args } => cmd_installer(&config, &args).await,
        Command::Config { args } => cmd_config(&config, &args).await,
        Command::Provision {
            args,
            installer_helper,
        } => cmd_provision(&config, &args, installer_helper).await,
    }
}

fn provisioner(
    config: &Config,
    args: &ProvisionArgs,
) -> Result<Provisioner<HdiutilMounter>, AppError> {
    let options = provision_options(config, args)?;
    let http = HttpClient::new()?;
    Ok(Provisioner::new(options, mounter(config), http)?)
}

/// Tracks download percent. The bar clears itself at 100 so nothing is left
/// on screen once the interactive installer helper takes the terminal.
fn on_progress(bar: &ProgressBar) -> impl FnMut(u8) + '_ {
    move |percent| {
        bar.set_position(u64::from(percent));
        if percent >= 100 {
            bar.finish_and_clear();
        }
    }
}

async fn cmd_installer(config: &Config, args: &ProvisionArgs) -> Result<(), AppError> {
    let provisioner = provisioner(config, args)?;
    let bar = download_bar();
    let prepared = provisioner.prepare_installer(on_progress(&bar)).await;
    bar.finish_and_clear();
    let prepared = prepared?;
    info!(url = %prepared.url, fetch = ?prepared.fetch, "install CD ready");
    info!(
        script = %prepared.paths.install_script_path().display(),
        "installer ready, run the script to boot the NixOS install CD"
    );
    Ok(())
}

async fn cmd_config(config: &Config, args: &ProvisionArgs) -> Result<(), AppError> {
    let provisioner = provisioner(config, args)?;
    let path = provisioner.write_config().await?;
    info!(path = %path.display(), "wrote VM config");
    Ok(())
}

async fn cmd_provision(
    config: &Config,
    args: &ProvisionArgs,
    installer_helper: PathBuf,
) -> Result<(), AppError> {
    let provisioner = provisioner(config, args)?;
    let bar = download_bar();
    let provisioned = provisioner
        .provision(&installer_helper, on_progress(&bar))
        .await;
    bar.finish_and_clear();
    provisioned?;

    print_next_steps(&provisioner.paths().work_dir().display().to_string());
    Ok(())
}

fn print_next_steps(work_dir: &str) {
    println!(
        r#"
Now set $VMCTLDIR to a directory where your VMs will live, create a directory
$VMCTLDIR/<name-of-vm>, and copy the following files into there:

    {work_dir}/{{disk.img, vm.conf, kernel, initrd}}

You can then start the VM with "vmctl start <name-of-vm>", and connect using
either:

 - "vmctl attach <name-of-vm>" to log in via console (exit with "C-a d")
 - "vmctl ip <name-of-vm>" and ssh-ing in as root to that IP address
 - If that fails, do "arp -a" and pick the latest 192.168.64.* IP address

The disk defaults to only 4G, but you can grow it any time while the VM is
powered off, with eg

   dd if=/dev/null of=$VMCTLDIR/<name-of-vm>/disk.img bs=1g count=0 seek=16

for 16G (final parameter).
"#
    );
}
