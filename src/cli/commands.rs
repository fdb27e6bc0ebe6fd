use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "delegate-chain", about = "DPoS ledger core tools")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "keygen", about = "Derive a keypair from a secret passphrase")]
    Keygen {
        #[arg(long, help = "Secret passphrase")]
        secret: String,
    },
    #[command(name = "address", about = "Derive the address of a public key")]
    Address {
        #[arg(long = "public-key", help = "Hex encoded Ed25519 public key")]
        public_key: String,
    },
    #[command(
        name = "genesis",
        about = "Create and apply a genesis block registering the secret's owner as delegate"
    )]
    Genesis {
        #[arg(long, help = "Secret passphrase of the genesis delegate")]
        secret: String,
        #[arg(long, default_value = "genesis", help = "Delegate username")]
        username: String,
        #[arg(long = "data-dir", help = "Ledger directory (defaults to DATA_DIR)")]
        data_dir: Option<PathBuf>,
    },
    #[command(name = "status", about = "Print the tip of a stored chain")]
    Status {
        #[arg(long = "data-dir", help = "Ledger directory (defaults to DATA_DIR)")]
        data_dir: Option<PathBuf>,
    },
    #[command(
        name = "verify-block",
        about = "Run the receipt checks on a block stored as JSON"
    )]
    VerifyBlock {
        #[arg(long, help = "Path to the block JSON")]
        file: PathBuf,
    },
}
