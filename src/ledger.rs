//! Balance aggregation, commission splitting and withdrawal classification.
//!
//! This is the arithmetic shared by the user dashboard, the withdrawal flow
//! and both admin screens. Everything user-visible about money goes through
//! here so the numbers cannot drift between pages.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::types::{EmailSubmission, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED};

pub fn percent_of(amount: i64, percent: i32) -> i64 {
    ((amount as i128 * percent as i128) / 100) as i64
}

/// How an investment amount is split at creation time. The referral payout is
/// carved out of the company share, so the three figures never exceed the
/// invested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommissionSplit {
    pub referral_payout: i64,
    pub company_share: i64,
    pub user_keeps_share: i64,
}

impl CommissionSplit {
    pub fn compute(
        amount: i64,
        referral_pct: i32,
        company_pct: i32,
        user_keeps_pct: i32,
    ) -> Self {
        let referral_payout = percent_of(amount, referral_pct);
        let company_share = percent_of(amount, company_pct) - referral_payout;
        let user_keeps_share = percent_of(amount, user_keeps_pct);
        CommissionSplit {
            referral_payout,
            company_share,
            user_keeps_share,
        }
    }
}

/// Percentage fields must reconcile before a plan is saved; free-text
/// percentages are not trusted.
pub fn validate_plan_percentages(
    referral_pct: i32,
    company_pct: i32,
    user_keeps_pct: i32,
) -> Result<(), String> {
    for pct in [referral_pct, company_pct, user_keeps_pct] {
        if !(0..=100).contains(&pct) {
            return Err("percentages must be between 0 and 100".to_string());
        }
    }
    if company_pct + user_keeps_pct != 100 {
        return Err("company and user-keeps percentages must add up to 100".to_string());
    }
    if referral_pct > company_pct {
        return Err("referral commission cannot exceed the company share".to_string());
    }
    Ok(())
}

/// Withdrawal categories shown on the admin screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalKind {
    Email,
    Other,
}

impl WithdrawalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalKind::Email => "email",
            WithdrawalKind::Other => "other",
        }
    }
}

/// A withdrawal counts as an email-earnings payout when it was fully covered
/// by submission earnings. Recomputed on every read, never persisted as
/// authoritative.
pub fn classify_withdrawal(profit_amount: i64, referral_amount: i64) -> WithdrawalKind {
    if profit_amount > 0 && referral_amount == 0 {
        WithdrawalKind::Email
    } else {
        WithdrawalKind::Other
    }
}

/// Amount/profit/referral totals over one withdrawal status bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalSums {
    pub amount: i64,
    pub profit: i64,
    pub referral: i64,
}

/// Raw sums feeding the balance computation.
#[derive(Debug, Default, Clone, Copy)]
pub struct BalanceParts {
    pub approved_deposits: i64,
    pub approved_submissions: i64,
    pub referral_credits: i64,
    /// Totals over approved withdrawals.
    pub withdrawn: WithdrawalSums,
    /// Totals over pending withdrawals; a pending row reserves its funds.
    pub reserved: WithdrawalSums,
}

/// Per-user withdrawable balance, broken down by source. Rejected withdrawals
/// appear in neither `withdrawn` nor `reserved`, which is what refunds them:
/// the total returns to its pre-request value without a compensating write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceBreakdown {
    pub total_balance: i64,
    pub deposit_balance: i64,
    pub email_earnings: i64,
    pub referral_earnings: i64,
    /// Amount currently held by pending withdrawals.
    pub reserved: i64,
}

impl BalanceBreakdown {
    pub fn from_parts(p: &BalanceParts) -> Self {
        let email_earnings =
            p.approved_submissions - p.withdrawn.profit - p.reserved.profit;
        let referral_earnings =
            p.referral_credits - p.withdrawn.referral - p.reserved.referral;
        let deposit_balance = p.approved_deposits
            - (p.withdrawn.amount - p.withdrawn.profit - p.withdrawn.referral)
            - (p.reserved.amount - p.reserved.profit - p.reserved.referral);
        BalanceBreakdown {
            total_balance: deposit_balance + email_earnings + referral_earnings,
            deposit_balance,
            email_earnings,
            referral_earnings,
            reserved: p.reserved.amount,
        }
    }
}

/// Splits a requested withdrawal across the earning buckets: email earnings
/// drain first, then referral earnings, and whatever remains comes out of the
/// deposit balance. Returns `(profit_amount, referral_amount)`; their sum
/// never exceeds `amount`.
pub fn allocate_withdrawal(amount: i64, balance: &BalanceBreakdown) -> (i64, i64) {
    let profit_amount = amount.min(balance.email_earnings.max(0));
    let referral_amount = (amount - profit_amount).min(balance.referral_earnings.max(0));
    (profit_amount, referral_amount)
}

/// Per-user submission counters shown on the dashboard and the gig page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionStats {
    pub approved_count: i64,
    pub pending_count: i64,
    pub rejected_count: i64,
    pub total_earned: i64,
}

pub fn submission_stats(rows: &[EmailSubmission]) -> SubmissionStats {
    let mut stats = SubmissionStats::default();
    for row in rows {
        match row.status.as_str() {
            STATUS_APPROVED => {
                stats.approved_count += 1;
                stats.total_earned += row.price_at_submission;
            }
            STATUS_PENDING => stats.pending_count += 1,
            STATUS_REJECTED => stats.rejected_count += 1,
            _ => {}
        }
    }
    stats
}

async fn withdrawal_sums(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    status: &str,
) -> Result<WithdrawalSums> {
    let (amount, profit, referral): (i64, i64, i64) = sqlx::query_as(
        r#"SELECT COALESCE(SUM(amount), 0)::BIGINT,
                  COALESCE(SUM(profit_amount), 0)::BIGINT,
                  COALESCE(SUM(referral_amount), 0)::BIGINT
           FROM withdrawals WHERE user_id = $1 AND status = $2"#,
    )
    .bind(user_id)
    .bind(status)
    .fetch_one(tx.as_mut())
    .await?;

    Ok(WithdrawalSums {
        amount,
        profit,
        referral,
    })
}

/// Gathers the raw sums for one user. Runs inside the caller's transaction so
/// withdrawal creation sees the same snapshot it later inserts against.
pub async fn balance_parts(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<BalanceParts> {
    let approved_deposits: i64 = sqlx::query_scalar(
        r#"SELECT COALESCE(SUM(amount), 0)::BIGINT FROM deposits
           WHERE user_id = $1 AND status = $2"#,
    )
    .bind(user_id)
    .bind(STATUS_APPROVED)
    .fetch_one(tx.as_mut())
    .await?;

    let approved_submissions: i64 = sqlx::query_scalar(
        r#"SELECT COALESCE(SUM(price_at_submission), 0)::BIGINT FROM email_submissions
           WHERE user_id = $1 AND status = $2"#,
    )
    .bind(user_id)
    .bind(STATUS_APPROVED)
    .fetch_one(tx.as_mut())
    .await?;

    let referral_credits: i64 = sqlx::query_scalar(
        r#"SELECT COALESCE(SUM(amount), 0)::BIGINT FROM referral_credits
           WHERE beneficiary_id = $1"#,
    )
    .bind(user_id)
    .fetch_one(tx.as_mut())
    .await?;

    let withdrawn = withdrawal_sums(tx, user_id, STATUS_APPROVED).await?;
    let reserved = withdrawal_sums(tx, user_id, STATUS_PENDING).await?;

    Ok(BalanceParts {
        approved_deposits,
        approved_submissions,
        referral_credits,
        withdrawn,
        reserved,
    })
}

pub async fn balance_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<BalanceBreakdown> {
    let parts = balance_parts(tx, user_id).await?;
    Ok(BalanceBreakdown::from_parts(&parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn submission(status: &str, price: i64) -> EmailSubmission {
        EmailSubmission {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email_address: "someone@gmail.com".to_string(),
            status: status.to_string(),
            price_at_submission: price,
            rejection_reason: None,
            attached_proof: None,
            approved_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn percent_of_truncates() {
        assert_eq!(percent_of(1000, 7), 70);
        assert_eq!(percent_of(99, 7), 6);
        assert_eq!(percent_of(0, 50), 0);
    }

    #[test]
    fn commission_split_carves_referral_out_of_company() {
        let split = CommissionSplit::compute(10_000, 7, 80, 20);
        assert_eq!(split.referral_payout, 700);
        assert_eq!(split.company_share, 7_300);
        assert_eq!(split.user_keeps_share, 2_000);
        assert!(split.referral_payout + split.company_share + split.user_keeps_share <= 10_000);
    }

    #[test]
    fn commission_split_without_referrer_share_is_zero() {
        let split = CommissionSplit::compute(10_000, 0, 80, 20);
        assert_eq!(split.referral_payout, 0);
        assert_eq!(split.company_share, 8_000);
    }

    #[test]
    fn plan_percentages_must_reconcile() {
        assert!(validate_plan_percentages(7, 80, 20).is_ok());
        assert!(validate_plan_percentages(0, 100, 0).is_ok());
        assert!(validate_plan_percentages(7, 70, 20).is_err());
        assert!(validate_plan_percentages(90, 80, 20).is_err());
        assert!(validate_plan_percentages(-1, 80, 20).is_err());
        assert!(validate_plan_percentages(7, 101, -1).is_err());
    }

    #[test]
    fn classifier_covers_all_sign_combinations() {
        assert_eq!(classify_withdrawal(100, 0), WithdrawalKind::Email);
        assert_eq!(classify_withdrawal(100, 50), WithdrawalKind::Other);
        assert_eq!(classify_withdrawal(0, 50), WithdrawalKind::Other);
        assert_eq!(classify_withdrawal(0, 0), WithdrawalKind::Other);
    }

    #[test]
    fn breakdown_sums_sources_and_subtracts_withdrawals() {
        let parts = BalanceParts {
            approved_deposits: 10_000,
            approved_submissions: 300,
            referral_credits: 700,
            withdrawn: WithdrawalSums {
                amount: 1_100,
                profit: 100,
                referral: 0,
            },
            reserved: WithdrawalSums {
                amount: 200,
                profit: 200,
                referral: 0,
            },
        };
        let b = BalanceBreakdown::from_parts(&parts);
        assert_eq!(b.email_earnings, 0);
        assert_eq!(b.referral_earnings, 700);
        assert_eq!(b.deposit_balance, 9_000);
        assert_eq!(b.total_balance, 9_700);
        assert_eq!(b.reserved, 200);
    }

    #[test]
    fn rejecting_a_pending_withdrawal_restores_the_total() {
        let before = BalanceParts {
            approved_deposits: 5_000,
            approved_submissions: 500,
            referral_credits: 0,
            withdrawn: WithdrawalSums::default(),
            reserved: WithdrawalSums::default(),
        };
        let original = BalanceBreakdown::from_parts(&before).total_balance;

        // Submit a withdrawal of 800: it shows up as reserved.
        let pending = BalanceParts {
            reserved: WithdrawalSums {
                amount: 800,
                profit: 500,
                referral: 0,
            },
            ..before
        };
        assert_eq!(
            BalanceBreakdown::from_parts(&pending).total_balance,
            original - 800
        );

        // Rejection drops the row from both buckets; the total is back.
        let after = BalanceParts {
            reserved: WithdrawalSums::default(),
            ..before
        };
        assert_eq!(BalanceBreakdown::from_parts(&after).total_balance, original);
    }

    #[test]
    fn allocation_drains_email_earnings_first() {
        let balance = BalanceBreakdown {
            total_balance: 1_500,
            deposit_balance: 1_000,
            email_earnings: 300,
            referral_earnings: 200,
            reserved: 0,
        };
        assert_eq!(allocate_withdrawal(250, &balance), (250, 0));
        assert_eq!(allocate_withdrawal(400, &balance), (300, 100));
        assert_eq!(allocate_withdrawal(1_500, &balance), (300, 200));
    }

    #[test]
    fn allocation_never_exceeds_the_requested_amount() {
        let balance = BalanceBreakdown {
            total_balance: 900,
            deposit_balance: 0,
            email_earnings: 600,
            referral_earnings: 300,
            reserved: 0,
        };
        for amount in [1, 100, 599, 600, 601, 900] {
            let (profit, referral) = allocate_withdrawal(amount, &balance);
            assert!(profit + referral <= amount);
            assert!(profit <= balance.email_earnings);
            assert!(referral <= balance.referral_earnings);
        }
    }

    #[test]
    fn allocated_email_only_withdrawals_classify_as_email() {
        let balance = BalanceBreakdown {
            total_balance: 500,
            deposit_balance: 0,
            email_earnings: 500,
            referral_earnings: 0,
            reserved: 0,
        };
        let (profit, referral) = allocate_withdrawal(300, &balance);
        assert_eq!(classify_withdrawal(profit, referral), WithdrawalKind::Email);
    }

    #[test]
    fn submission_stats_scenario() {
        // Three submissions at Rs.50; two approved, one rejected.
        let rows = vec![
            submission(STATUS_APPROVED, 50),
            submission(STATUS_APPROVED, 50),
            submission(STATUS_REJECTED, 50),
        ];
        let stats = submission_stats(&rows);
        assert_eq!(stats.approved_count, 2);
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.rejected_count, 1);
        assert_eq!(stats.total_earned, 100);
    }
}
