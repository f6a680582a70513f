use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use tally_categorize::{find_similar_merchants, Categorizer, MatchSource, RuleSource, SearchQuery};
use tally_core::{normalize_pattern, AccountId, CategoryId, ColumnRole, DetectOptions, UserId};
use tally_import::{classify_header, load, suggest_columns, TagClassifier};
use tally_pipeline::{ImportRequest, ImportSettings, Importer};
use tally_storage::{
    create_account, create_db, create_merchant, create_rule, NewMerchant, NewRule, SqliteStore,
};
use tracing::info;

use crate::cli::SearchMode;

pub struct App {
    store: Arc<SqliteStore>,
    categorizer: Arc<Categorizer>,
    settings: ImportSettings,
}

impl App {
    pub async fn open(db: Option<&Path>, config: Option<&Path>) -> Result<Self> {
        let settings = match config {
            Some(path) => ImportSettings::load(path)
                .with_context(|| format!("reading settings from {}", path.display()))?,
            None => ImportSettings::default(),
        };
        let db_path = match db {
            Some(path) => path.to_path_buf(),
            None => default_db_path()?,
        };
        let pool = create_db(&db_path)
            .await
            .with_context(|| format!("opening database {}", db_path.display()))?;
        info!(db = %db_path.display(), "database opened");

        let store = Arc::new(SqliteStore::new(pool));
        let categorizer = Arc::new(
            Categorizer::new(Arc::clone(&store) as Arc<dyn RuleSource>)
                .with_fuzzy_threshold(settings.fuzzy_threshold),
        );
        Ok(Self {
            store,
            categorizer,
            settings,
        })
    }

    fn importer(&self) -> Importer<SqliteStore, SqliteStore> {
        Importer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.store),
            Arc::clone(&self.categorizer),
            self.settings.clone(),
        )
    }
}

fn default_db_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "tally", "Tally")
        .context("could not determine the platform data directory; pass --db")?;
    let dir = dirs.data_dir();
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir.join("tally.db"))
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn role_label(role: Option<ColumnRole>) -> String {
    role.map_or_else(|| "-".to_string(), |r| r.to_string())
}

// ── analyze ───────────────────────────────────────────────────────────────────

pub async fn analyze(app: &App, file: &Path, user: i64, detect: DetectOptions) -> Result<()> {
    let bytes = read_file(file).await?;
    let analysis = app.importer().analyze(UserId(user), &bytes, &detect).await?;
    let config = &analysis.config;

    println!("Format:       {:?}", config.format);
    println!("Delimiter:    {:?}", config.delimiter as char);
    println!("Header row:   {}", config.skip_lines);
    println!("Fingerprint:  {}", config.fingerprint);
    println!();
    println!("Columns:");
    for (i, header) in config.headers.iter().enumerate() {
        println!("  {i:>2}  {header:<30} {}", role_label(classify_header(header)));
    }
    println!();

    let dialect = &analysis.dialect;
    println!(
        "Numbers:      {} (decimal '{}', confidence {:.2})",
        if dialect.is_european() { "European" } else { "US" },
        dialect.decimal_sep,
        dialect.confidence
    );
    println!("Date order:   {:?}", dialect.date_order);
    println!(
        "Currency:     {}",
        analysis.detected_currency.as_deref().unwrap_or("not detected")
    );
    println!(
        "Double entry: {}",
        if analysis.suggestion.is_double_entry { "yes" } else { "no" }
    );
    match &analysis.saved_mapping {
        Some(saved) if saved.user_id.is_none() => println!("Saved mapping: global"),
        Some(_) => println!("Saved mapping: yours"),
        None => println!("Saved mapping: none"),
    }
    println!(
        "Auto import:  {}",
        if analysis.can_auto_import { "ready" } else { "needs a column mapping" }
    );
    Ok(())
}

// ── import ────────────────────────────────────────────────────────────────────

pub struct ImportOptions {
    pub file: PathBuf,
    pub user: i64,
    pub account: i64,
    pub currency: Option<String>,
    pub default_currency: bool,
    pub save_mapping: bool,
    pub tag: bool,
    pub json: bool,
    pub detect: DetectOptions,
}

pub async fn import(app: &App, opts: ImportOptions) -> Result<()> {
    let mut importer = app.importer();
    if opts.tag {
        importer = importer.with_classifier(Arc::new(TagClassifier::with_defaults()));
    }

    let mut request = ImportRequest::new(UserId(opts.user), AccountId(opts.account));
    request.currency = opts.currency;
    request.use_default_currency = opts.default_currency;
    request.save_mapping = opts.save_mapping;
    request.detect = opts.detect;
    request.file_name = opts
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);

    let cancel = request.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let bytes = read_file(&opts.file).await?;
    let (report, insights) = importer
        .import_and_wait_insights(&bytes, request)
        .await
        .with_context(|| format!("importing {}", opts.file.display()))?;

    if opts.json {
        let out = serde_json::json!({ "report": report, "insights": insights });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Job {} {}", report.job_id, report.status.as_str());
    println!("  currency:    {}", report.currency);
    println!("  rows:        {}", report.total_rows);
    println!("  imported:    {}", report.imported);
    println!("  duplicates:  {}", report.duplicates);
    println!("  skipped:     {}", report.skipped);
    println!("  failed:      {}", report.failed);
    println!("  categorized: {}", report.categorized);
    if let Some(insights) = &insights {
        println!(
            "  quality:     {:.0}% categorized, {:.0}% dates, {:.0}% amounts",
            insights.categorization_rate * 100.0,
            insights.date_quality * 100.0,
            insights.amount_quality * 100.0
        );
    }
    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &report.errors {
            println!("  {error}");
        }
    }
    Ok(())
}

// ── catalog ───────────────────────────────────────────────────────────────────

pub async fn account_add(app: &App, user: i64, name: &str, currency: Option<&str>) -> Result<()> {
    let id = create_account(app.store.pool(), UserId(user), name, currency).await?;
    println!("Added account {id}: {name}");
    Ok(())
}

pub async fn rule_add(
    app: &App,
    user: i64,
    pattern: &str,
    name: &str,
    category: Option<i64>,
    priority: i32,
    recurring: bool,
) -> Result<()> {
    if !(0..=999).contains(&priority) {
        bail!("priority must be between 0 and 999");
    }
    if normalize_pattern(pattern).is_empty() {
        bail!("pattern must contain more than wildcards");
    }
    let id = create_rule(
        app.store.pool(),
        &NewRule {
            user_id: UserId(user),
            pattern,
            clean_name: name,
            category_id: category.map(CategoryId),
            priority,
            is_recurring: recurring,
        },
    )
    .await?;
    app.categorizer.invalidate(UserId(user));
    println!("Added rule {id}: {pattern} -> {name}");
    Ok(())
}

pub async fn merchant_add(
    app: &App,
    pattern: &str,
    name: &str,
    category: Option<i64>,
    user: Option<i64>,
    recurring: bool,
) -> Result<()> {
    if normalize_pattern(pattern).is_empty() {
        bail!("pattern must contain more than wildcards");
    }
    let id = create_merchant(
        app.store.pool(),
        &NewMerchant {
            user_id: user.map(UserId),
            pattern,
            clean_name: name,
            category_id: category.map(CategoryId),
            is_recurring: recurring,
        },
    )
    .await?;
    match user {
        Some(user) => app.categorizer.invalidate(UserId(user)),
        None => app.categorizer.invalidate_all(),
    }
    let scope = if user.is_some() { "user" } else { "system" };
    println!("Added {scope} merchant {id}: {pattern} -> {name}");
    Ok(())
}

// ── suggest ───────────────────────────────────────────────────────────────────

fn search_query(text: String, mode: SearchMode, fuzziness: u8) -> Result<SearchQuery> {
    Ok(match mode {
        SearchMode::Match => SearchQuery::Match { text },
        SearchMode::Prefix => SearchQuery::Prefix { text },
        SearchMode::Fuzzy => SearchQuery::Fuzzy { text, fuzziness },
        SearchMode::Query => SearchQuery::QueryString { query: text },
        SearchMode::Category => {
            let id: i64 = text
                .trim()
                .parse()
                .with_context(|| format!("{text:?} is not a category id"))?;
            SearchQuery::Category {
                category_id: CategoryId(id),
            }
        }
    })
}

pub async fn suggest(
    app: &App,
    text: String,
    user: i64,
    mode: SearchMode,
    fuzziness: u8,
    limit: usize,
) -> Result<()> {
    let query = search_query(text, mode, fuzziness)?;
    let hits = app.categorizer.suggest(UserId(user), &query, limit).await?;
    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for hit in hits {
        let source = match hit.doc.source {
            MatchSource::Rule(id) => format!("rule {id}"),
            MatchSource::Merchant(id) => format!("merchant {id}"),
        };
        let category = hit
            .doc
            .category_id
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        println!(
            "{:>7.3}  {:<24} {:<24} category {:<6} {}",
            hit.score, hit.doc.clean_name, hit.doc.pattern, category, source
        );
    }
    Ok(())
}

// ── cluster ───────────────────────────────────────────────────────────────────

pub async fn cluster(app: &App, file: &Path, threshold: f64, detect: DetectOptions) -> Result<()> {
    if !(0.0..=100.0).contains(&threshold) {
        bail!("threshold must be between 0 and 100");
    }
    let bytes = read_file(file).await?;
    let source = load(&bytes, &detect, &app.settings.sniffer())?;
    let col = suggest_columns(&source.config.headers)
        .description_col
        .context("no description column recognised in the header")?;
    let descriptions = source.column_values(col)?;

    let mut clusters = find_similar_merchants(&descriptions, threshold);
    clusters.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
    for cluster in clusters {
        println!("{} ({})", cluster.label, cluster.members.len());
        for &i in &cluster.members {
            if descriptions[i] != cluster.label {
                println!("    {}", descriptions[i]);
            }
        }
    }
    Ok(())
}
