use std::sync::Arc;

use tally_categorize::{Categorizer, RuleSource, SearchQuery};
use tally_core::{AccountId, CategoryId, DetectOptions, UserId};
use tally_pipeline::{ImportError, ImportRequest, ImportSettings, Importer, JobStatus};
use tally_storage::{
    create_account, create_memory_db, create_merchant, create_rule, get_data_source_health,
    get_import_insights, get_import_job, get_transactions, NewMerchant, NewRule, SqliteStore,
};

const STATEMENT: &str = "Extrato de conta corrente\n\
    Moeda: BRL\n\
    \n\
    Data;Histórico;Valor;Saldo\n\
    02/01/2024;NETFLIX.COM ASSINATURA;-39,90;960,10\n\
    03/01/2024;SQ *STARBUKS 123456;-18,50;941,60\n\
    04/01/2024;PIX RECEBIDO 04/01 MARIA;1.500,00;2.441,60\n\
    31/02/2024;LOJA INVALIDA;-1,00;2.440,60\n\
    ;SALDO DO DIA;;2.440,60\n";

async fn setup() -> (Arc<SqliteStore>, AccountId) {
    let pool = create_memory_db().await.unwrap();
    let account = create_account(&pool, UserId(1), "Conta corrente", None).await.unwrap();
    create_rule(
        &pool,
        &NewRule {
            user_id: UserId(1),
            pattern: "%NETFLIX%",
            clean_name: "Netflix",
            category_id: Some(CategoryId(10)),
            priority: 0,
            is_recurring: true,
        },
    )
    .await
    .unwrap();
    for (pattern, name, category) in [
        ("%NETFLIX%", "Netflix (Merchant)", 11),
        ("STARBUCKS", "Starbucks", 20),
    ] {
        create_merchant(
            &pool,
            &NewMerchant {
                user_id: None,
                pattern,
                clean_name: name,
                category_id: Some(CategoryId(category)),
                is_recurring: false,
            },
        )
        .await
        .unwrap();
    }
    (Arc::new(SqliteStore::new(pool)), account)
}

fn importer(store: &Arc<SqliteStore>) -> Importer<SqliteStore, SqliteStore> {
    let categorizer = Categorizer::new(Arc::clone(store) as Arc<dyn RuleSource>);
    let settings = ImportSettings {
        workers: 2,
        ..ImportSettings::default()
    };
    Importer::new(Arc::clone(store), Arc::clone(store), Arc::new(categorizer), settings)
}

#[tokio::test]
async fn statement_import_end_to_end() {
    let (store, account) = setup().await;
    let importer = importer(&store);

    let analysis = importer
        .analyze(UserId(1), STATEMENT.as_bytes(), &DetectOptions::default())
        .await
        .unwrap();
    assert_eq!(analysis.config.skip_lines, 3);
    assert_eq!(analysis.detected_currency.as_deref(), Some("BRL"));
    assert!(analysis.dialect.is_european());
    assert!(analysis.can_auto_import);

    let mut request = ImportRequest::new(UserId(1), account);
    request.save_mapping = true;
    let (report, insights) = importer
        .import_and_wait_insights(STATEMENT.as_bytes(), request)
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Succeeded);
    assert_eq!(report.currency, "BRL");
    assert_eq!(report.imported, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.categorized, 2);
    assert!(report.errors[0].starts_with("row 8:"), "{:?}", report.errors);

    let rows = get_transactions(store.pool(), account).await.unwrap();
    assert_eq!(rows.len(), 3);
    let netflix = &rows[0];
    assert_eq!(netflix.merchant_name, "Netflix");
    assert_eq!(netflix.category_id, Some(CategoryId(10)));
    assert!(netflix.is_recurring);
    assert_eq!(netflix.amount_minor, -3990);
    let coffee = &rows[1];
    assert_eq!(coffee.merchant_name, "Starbucks");
    assert_eq!(coffee.category_id, Some(CategoryId(20)));
    let transfer = &rows[2];
    assert_eq!(transfer.amount_minor, 150_000);
    assert_eq!(transfer.merchant_name, "Maria");
    assert_eq!(transfer.category_id, None);

    let job = get_import_job(store.pool(), report.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.progress.imported, 3);

    let insights = insights.unwrap();
    assert_eq!(
        get_import_insights(store.pool(), report.job_id).await.unwrap(),
        Some(insights.clone())
    );
    assert!((insights.categorization_rate - 2.0 / 3.0).abs() < 1e-9);
    let health = get_data_source_health(store.pool(), account).await.unwrap().unwrap();
    assert_eq!(health.imports, 1);
    assert_eq!(health.last_status, Some(JobStatus::Succeeded));

    // The saved mapping is found on the next analysis.
    let again = importer
        .analyze(UserId(1), STATEMENT.as_bytes(), &DetectOptions::default())
        .await
        .unwrap();
    let saved = again.saved_mapping.unwrap();
    assert_eq!(saved.user_id, Some(UserId(1)));
    assert_eq!(saved.mapping.is_european_format, Some(true));
}

#[tokio::test]
async fn reimport_skips_duplicates() {
    let (store, account) = setup().await;
    let importer = importer(&store);
    importer
        .import(STATEMENT.as_bytes(), ImportRequest::new(UserId(1), account))
        .await
        .unwrap();
    let second = importer
        .import(STATEMENT.as_bytes(), ImportRequest::new(UserId(1), account))
        .await
        .unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.duplicates, 3);
    assert_eq!(get_transactions(store.pool(), account).await.unwrap().len(), 3);
}

#[tokio::test]
async fn missing_currency_aborts_before_any_job() {
    let (store, account) = setup().await;
    let csv = "Data;Descrição;Valor\n02/01/2024;PADARIA;-10,00\n";
    let err = importer(&store)
        .import(csv.as_bytes(), ImportRequest::new(UserId(1), account))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Currency(_)));
    let (jobs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM import_jobs")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(jobs, 0);
}

#[tokio::test]
async fn new_rules_apply_after_invalidation() {
    let (store, account) = setup().await;
    let importer = importer(&store);
    let csv = "Data;Descrição;Valor\n02/01/2024;PADARIA REAL;-10,00\n";

    let mut request = ImportRequest::new(UserId(1), account);
    request.currency = Some("BRL".into());
    let first = importer.import(csv.as_bytes(), request.clone()).await.unwrap();
    assert_eq!(first.categorized, 0);

    create_rule(
        store.pool(),
        &NewRule {
            user_id: UserId(1),
            pattern: "PADARIA",
            clean_name: "Padaria",
            category_id: Some(CategoryId(30)),
            priority: 0,
            is_recurring: false,
        },
    )
    .await
    .unwrap();
    importer.categorizer().invalidate(UserId(1));

    let hits = importer
        .categorizer()
        .suggest(UserId(1), &SearchQuery::Prefix { text: "pada".into() }, 5)
        .await
        .unwrap();
    assert_eq!(hits[0].doc.clean_name, "Padaria");

    let results = importer.categorizer().categorize(UserId(1), &["PADARIA REAL"]).await;
    assert_eq!(results[0].category_id, Some(CategoryId(30)));
}
