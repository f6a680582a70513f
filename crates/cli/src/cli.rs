use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tally_core::DetectOptions;

#[derive(Parser)]
#[command(name = "tally", about = "Bank statement import and transaction categorisation.")]
pub struct Cli {
    /// SQLite database (default: the platform data directory)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Import settings in TOML
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect a statement's layout without importing it.
    Analyze {
        file: PathBuf,
        /// Look up mappings saved by this user
        #[arg(long, default_value_t = 0)]
        user: i64,
        #[command(flatten)]
        detect: DetectArgs,
    },
    /// Import a CSV/TSV/XLSX statement into an account.
    Import {
        file: PathBuf,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        account: i64,
        /// Statement currency (overrides the account's)
        #[arg(long)]
        currency: Option<String>,
        /// Fall back to `default_currency` from the settings file
        #[arg(long)]
        default_currency: bool,
        /// Remember the resolved column mapping for this file layout
        #[arg(long)]
        save_mapping: bool,
        /// Tag rows (installment, subscription, transfer, fee)
        #[arg(long)]
        tag: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        detect: DetectArgs,
    },
    /// Manage accounts.
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Manage categorisation rules.
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Manage the merchant catalog.
    Merchant {
        #[command(subcommand)]
        command: MerchantCommands,
    },
    /// Search rules and merchants.
    Suggest {
        query: String,
        #[arg(long)]
        user: i64,
        #[arg(long, value_enum, default_value_t = SearchMode::Match)]
        mode: SearchMode,
        /// Edit distance for fuzzy mode (0-2)
        #[arg(long, default_value_t = 1)]
        fuzziness: u8,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Group similar descriptions in a statement.
    Cluster {
        file: PathBuf,
        /// Minimum similarity score (0-100)
        #[arg(long, default_value_t = 80.0)]
        threshold: f64,
        #[command(flatten)]
        detect: DetectArgs,
    },
}

#[derive(clap::Args, Clone, Copy, Default)]
pub struct DetectArgs {
    /// Field delimiter, e.g. ';' or 'tab'
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Zero-based line of the header row
    #[arg(long)]
    pub header_row: Option<usize>,
}

impl From<DetectArgs> for DetectOptions {
    fn from(args: DetectArgs) -> Self {
        DetectOptions {
            header_row: args.header_row,
            delimiter: args.delimiter,
        }
    }
}

fn parse_delimiter(s: &str) -> Result<u8, String> {
    match s {
        "tab" | "\\t" => Ok(b'\t'),
        _ => match s.as_bytes() {
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(format!("expected a single ASCII character, got {s:?}")),
        },
    }
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Add an account.
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        name: String,
        /// ISO currency code, e.g. BRL
        #[arg(long)]
        currency: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Add a rule. Patterns match case-insensitively; `%` wildcards are ignored.
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        pattern: String,
        /// Display name for matching transactions
        #[arg(long)]
        name: String,
        #[arg(long)]
        category: Option<i64>,
        /// 0-999; higher wins among rules
        #[arg(long, default_value_t = 0)]
        priority: i32,
        #[arg(long)]
        recurring: bool,
    },
}

#[derive(Subcommand)]
pub enum MerchantCommands {
    /// Add a merchant. Without --user it joins the shared catalog.
    Add {
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        user: Option<i64>,
        #[arg(long)]
        recurring: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum SearchMode {
    Match,
    Prefix,
    Fuzzy,
    Query,
    /// The query is a category id
    Category,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_import() {
        let cli = Cli::try_parse_from([
            "tally", "--db", "/tmp/t.db", "import", "extrato.csv", "--user", "1", "--account", "2",
            "--delimiter", ";", "--save-mapping",
        ])
        .unwrap();
        let Commands::Import { user, account, detect, save_mapping, .. } = cli.command else {
            panic!("expected import");
        };
        assert_eq!((user, account), (1, 2));
        assert_eq!(detect.delimiter, Some(b';'));
        assert!(save_mapping);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/t.db")));
    }

    #[test]
    fn delimiter_aliases() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("\\t"), Ok(b'\t'));
        assert_eq!(parse_delimiter("|"), Ok(b'|'));
        assert!(parse_delimiter(";;").is_err());
    }

    #[test]
    fn parses_suggest_mode() {
        let cli = Cli::try_parse_from(["tally", "suggest", "netf", "--user", "1", "--mode", "prefix"]).unwrap();
        let Commands::Suggest { mode, fuzziness, .. } = cli.command else {
            panic!("expected suggest");
        };
        assert_eq!(mode, SearchMode::Prefix);
        assert_eq!(fuzziness, 1);
    }
}
