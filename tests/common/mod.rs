#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use std::path::{Path, PathBuf};

/// Category for row `i` of the sales fixture.
pub fn category(i: usize) -> &'static str {
    ["North", "South", "East", "West"][i % 4]
}

/// Amount for row `i` of the sales fixture; every tenth row is empty.
pub fn amount(i: usize) -> Option<i64> {
    if i % 10 == 0 {
        None
    } else {
        Some(i as i64 + 1)
    }
}

/// 100 rows of `id,category,amount` with 10% empty amounts.
pub fn sales_csv(rows: usize) -> String {
    let mut out = String::from("id,category,amount\n");
    for i in 0..rows {
        let amount = amount(i).map(|a| a.to_string()).unwrap_or_default();
        out.push_str(&format!("{},{},{}\n", i, category(i), amount));
    }
    out
}

/// Order date for row `i`: one row per day from 2024-01-01.
pub fn order_date(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(i as i64)
}

/// The sales fixture with a trailing `date` column.
pub fn dated_sales_csv(rows: usize) -> String {
    let mut out = String::from("id,category,amount,date\n");
    for i in 0..rows {
        let amount = amount(i).map(|a| a.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{}\n",
            i,
            category(i),
            amount,
            order_date(i).format("%Y-%m-%d")
        ));
    }
    out
}

/// Expected per-category sum of the sales fixture, in first-seen order.
pub fn expected_sums(rows: usize) -> Vec<(&'static str, f64)> {
    let mut sums: Vec<(&'static str, f64)> = Vec::new();
    for i in 0..rows {
        let c = category(i);
        let a = amount(i).unwrap_or(0) as f64;
        match sums.iter_mut().find(|(name, _)| *name == c) {
            Some((_, total)) => *total += a,
            None => sums.push((c, a)),
        }
    }
    sums
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
