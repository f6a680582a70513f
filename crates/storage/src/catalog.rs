use serde::{Deserialize, Serialize};
use tally_core::{AccountId, CategoryId, CategoryRule, Merchant, MerchantId, Owner, RuleId, UserId};

use crate::db::{DbPool, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub name: String,
    pub currency: Option<String>,
}

pub async fn create_account(
    pool: &DbPool,
    user: UserId,
    name: &str,
    currency: Option<&str>,
) -> Result<AccountId, StorageError> {
    let result = sqlx::query("INSERT INTO accounts (user_id, name, currency) VALUES (?, ?, ?)")
        .bind(user.0)
        .bind(name)
        .bind(currency.map(str::to_uppercase))
        .execute(pool)
        .await?;
    Ok(AccountId(result.last_insert_rowid()))
}

pub async fn get_account(pool: &DbPool, id: AccountId) -> Result<Option<Account>, StorageError> {
    let row = sqlx::query_as::<_, (i64, i64, String, Option<String>)>(
        "SELECT id, user_id, name, currency FROM accounts WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Account {
        id: AccountId(r.0),
        user_id: UserId(r.1),
        name: r.2,
        currency: r.3,
    }))
}

pub async fn get_account_currency(
    pool: &DbPool,
    id: AccountId,
) -> Result<Option<String>, StorageError> {
    Ok(get_account(pool, id).await?.and_then(|a| a.currency))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRule<'a> {
    pub user_id: UserId,
    pub pattern: &'a str,
    pub clean_name: &'a str,
    pub category_id: Option<CategoryId>,
    pub priority: i32,
    pub is_recurring: bool,
}

pub async fn create_rule(pool: &DbPool, rule: &NewRule<'_>) -> Result<RuleId, StorageError> {
    let result = sqlx::query(
        "INSERT INTO category_rules (user_id, pattern, clean_name, category_id, priority, is_recurring) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(rule.user_id.0)
    .bind(rule.pattern)
    .bind(rule.clean_name)
    .bind(rule.category_id.map(|c| c.0))
    .bind(rule.priority)
    .bind(rule.is_recurring)
    .execute(pool)
    .await?;
    Ok(RuleId(result.last_insert_rowid()))
}

pub async fn get_rules(pool: &DbPool, user: UserId) -> Result<Vec<CategoryRule>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, i64, String, String, Option<i64>, i32, i64)>(
        "SELECT id, user_id, pattern, clean_name, category_id, priority, is_recurring FROM category_rules WHERE user_id = ? ORDER BY id",
    )
    .bind(user.0)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| CategoryRule {
            id: RuleId(r.0),
            user_id: UserId(r.1),
            pattern: r.2,
            clean_name: r.3,
            category_id: r.4.map(CategoryId),
            priority: r.5,
            is_recurring: r.6 != 0,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMerchant<'a> {
    /// `None` adds to the shared catalog.
    pub user_id: Option<UserId>,
    pub pattern: &'a str,
    pub clean_name: &'a str,
    pub category_id: Option<CategoryId>,
    pub is_recurring: bool,
}

pub async fn create_merchant(
    pool: &DbPool,
    merchant: &NewMerchant<'_>,
) -> Result<MerchantId, StorageError> {
    let result = sqlx::query(
        "INSERT INTO merchants (user_id, pattern, clean_name, category_id, is_recurring) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(merchant.user_id.map(|u| u.0))
    .bind(merchant.pattern)
    .bind(merchant.clean_name)
    .bind(merchant.category_id.map(|c| c.0))
    .bind(merchant.is_recurring)
    .execute(pool)
    .await?;
    Ok(MerchantId(result.last_insert_rowid()))
}

/// System merchants plus the user's own.
pub async fn get_merchants(pool: &DbPool, user: UserId) -> Result<Vec<Merchant>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, Option<i64>, String, String, Option<i64>, i64)>(
        "SELECT id, user_id, pattern, clean_name, category_id, is_recurring FROM merchants WHERE user_id IS NULL OR user_id = ? ORDER BY id",
    )
    .bind(user.0)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Merchant {
            id: MerchantId(r.0),
            owner: r.1.map_or(Owner::System, |u| Owner::User(UserId(u))),
            pattern: r.2,
            clean_name: r.3,
            category_id: r.4.map(CategoryId),
            is_recurring: r.5 != 0,
        })
        .collect())
}
