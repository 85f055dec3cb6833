use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::DomainCheck;
use crate::export::{ClientFormat, FormatSelection};

#[derive(Parser)]
#[command(version, about = "Provision and operate a Hysteria2 endpoint", long_about = None)]
pub struct Args {
    #[arg(short, long, global = true, help = "Emit debug log")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Settings file [default: /etc/heyhy/config.toml]")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install the service, issuing a certificate if needed
    Install(InstallArgs),
    /// Change password, port or image of the installed service
    Update(UpdateArgs),
    Start,
    Stop,
    Restart,
    /// Remove the service, its working directory and certificate
    Remove,
    /// Follow the service logs
    Log,
    /// Show service state and client configurations
    #[command(alias = "check")]
    Status(FormatArgs),
    /// Convert share links to a mihomo proxy list, or back
    Convert(ConvertArgs),
}

impl Command {
    /// Whether the command manages the host service.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Command::Convert(_))
    }
}

#[derive(ClapArgs)]
pub struct InstallArgs {
    #[arg(short, long, help = "Domain bound to this host")]
    pub domain: Option<String>,

    #[arg(short, long, help = "Client password [default: random]")]
    pub password: Option<String>,

    #[arg(long, help = "Public IP shown to clients [default: discovered]")]
    pub ip: Option<IpAddr>,

    #[arg(
        long,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "UDP listen port [default: 443 or a free high port]"
    )]
    pub port: Option<u16>,

    #[arg(long, help = "Container image")]
    pub image: Option<String>,

    #[arg(long, requires = "key", help = "Existing certificate chain (absolute path)")]
    pub cert: Option<PathBuf>,

    #[arg(long, requires = "cert", help = "Existing private key (absolute path)")]
    pub key: Option<PathBuf>,

    #[arg(short = 'y', long = "yes", help = "Do not ask for confirmation")]
    pub assume_yes: bool,

    #[arg(long, value_enum, help = "Domain resolution check")]
    pub domain_check: Option<DomainCheck>,

    #[command(flatten)]
    pub formats: FormatArgs,
}

#[derive(ClapArgs)]
pub struct UpdateArgs {
    #[arg(short, long)]
    pub password: Option<String>,

    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    #[arg(long)]
    pub image: Option<String>,

    /// Rejected: the domain cannot change after install
    #[arg(short, long, hide = true)]
    pub domain: Option<String>,

    #[command(flatten)]
    pub formats: FormatArgs,
}

#[derive(ClapArgs, Default)]
pub struct FormatArgs {
    #[arg(long, help = "Print the hy2:// share link")]
    pub share_link: bool,

    #[arg(long, help = "Print the nekoray:// link")]
    pub nekoray: bool,

    #[arg(long, alias = "clash", help = "Print the mihomo proxy list")]
    pub mihomo: bool,

    #[arg(long, help = "Print the sing-box outbound")]
    pub singbox: bool,
}

impl FormatArgs {
    pub fn selection(&self) -> FormatSelection {
        let flags = [
            (self.share_link, ClientFormat::ShareLink),
            (self.nekoray, ClientFormat::NekoRay),
            (self.mihomo, ClientFormat::Mihomo),
            (self.singbox, ClientFormat::SingBox),
        ];
        FormatSelection::new(flags.into_iter().filter(|(on, _)| *on).map(|(_, f)| f))
    }
}

#[derive(ClapArgs)]
pub struct ConvertArgs {
    #[arg(help = "Input file, links or proxy-list YAML [default: stdin]")]
    pub input: Option<PathBuf>,

    #[arg(short, long, help = "Output path [default: stdout]")]
    pub output: Option<PathBuf>,
}
