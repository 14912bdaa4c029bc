//! Language-bucketed keyword lists that drive the analyzers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::error::{DetectError, DetectResult};

/// Minimum number of language buckets a configuration must carry.
pub const MIN_BUCKETS: usize = 2;

/// Keyword lists for one language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordBucket {
    #[serde(default)]
    pub subject: Vec<String>,
    #[serde(default)]
    pub sender: Vec<String>,
    #[serde(default)]
    pub amount: Vec<String>,
    #[serde(default)]
    pub company_suffix: Vec<String>,
}

/// Keyword buckets keyed by language tag (`zh`, `en`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordConfiguration {
    buckets: BTreeMap<String, KeywordBucket>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordConfiguration {
    fn default() -> Self {
        let zh = KeywordBucket {
            subject: strings(&[
                "发票",
                "电子发票",
                "增值税",
                "账单",
                "收据",
                "开票",
                "付款通知",
                "对账单",
            ]),
            sender: strings(&["fapiao", "invoice", "billing", "finance", "财务", "发票"]),
            amount: strings(&["金额", "价税合计", "合计", "总计", "应付", "实付"]),
            company_suffix: strings(&["股份有限公司", "有限公司", "有限责任公司", "集团", "公司"]),
        };
        let en = KeywordBucket {
            subject: strings(&["invoice", "bill", "receipt", "payment", "statement", "billing"]),
            sender: strings(&["invoice", "billing", "bill", "accounts", "payment", "receipt"]),
            amount: strings(&["total", "amount", "amount due", "balance", "subtotal"]),
            company_suffix: strings(&[
                "Inc.",
                "Inc",
                "Ltd.",
                "Ltd",
                "LLC",
                "Corp.",
                "Corporation",
                "GmbH",
                "Limited",
            ]),
        };
        Self {
            buckets: BTreeMap::from([("en".to_string(), en), ("zh".to_string(), zh)]),
        }
    }
}

impl KeywordConfiguration {
    /// Build from explicit buckets, validating and cleaning them.
    pub fn new(buckets: BTreeMap<String, KeywordBucket>) -> DetectResult<Self> {
        let cfg = Self { buckets }.cleaned();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Require at least [`MIN_BUCKETS`] named buckets.
    pub fn validate(&self) -> DetectResult<()> {
        if self.buckets.len() < MIN_BUCKETS {
            return Err(DetectError::InvalidKeywords {
                message: format!(
                    "{} language bucket(s) given, at least {MIN_BUCKETS} required",
                    self.buckets.len()
                ),
            });
        }
        if let Some(blank) = self.buckets.keys().find(|k| k.trim().is_empty()) {
            return Err(DetectError::InvalidKeywords {
                message: format!("bucket name \"{blank}\" is blank"),
            });
        }
        Ok(())
    }

    /// Trim entries and drop blanks and in-bucket duplicates.
    pub fn cleaned(mut self) -> Self {
        fn clean(list: &mut Vec<String>) {
            let mut seen = BTreeSet::new();
            list.retain_mut(|s| {
                *s = s.trim().to_string();
                !s.is_empty() && seen.insert(s.to_lowercase())
            });
        }
        for bucket in self.buckets.values_mut() {
            clean(&mut bucket.subject);
            clean(&mut bucket.sender);
            clean(&mut bucket.amount);
            clean(&mut bucket.company_suffix);
        }
        self
    }

    pub fn buckets(&self) -> &BTreeMap<String, KeywordBucket> {
        &self.buckets
    }

    pub fn bucket(&self, language: &str) -> Option<&KeywordBucket> {
        self.buckets.get(language)
    }

    /// Distinct lowercased subject terms across all buckets.
    pub fn subject_terms(&self) -> Vec<String> {
        self.distinct(|b| &b.subject)
    }

    /// Distinct lowercased sender terms across all buckets.
    pub fn sender_terms(&self) -> Vec<String> {
        self.distinct(|b| &b.sender)
    }

    /// Distinct lowercased amount terms across all buckets.
    pub fn amount_terms(&self) -> Vec<String> {
        self.distinct(|b| &b.amount)
    }

    /// Company suffixes across all buckets, original case, longest first.
    pub fn company_suffixes(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out: Vec<String> = self
            .buckets
            .values()
            .flat_map(|b| b.company_suffix.iter())
            .filter(|s| !s.trim().is_empty() && seen.insert(s.trim().to_string()))
            .map(|s| s.trim().to_string())
            .collect();
        out.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        out
    }

    fn distinct(&self, pick: impl Fn(&KeywordBucket) -> &Vec<String>) -> Vec<String> {
        let set: BTreeSet<String> = self
            .buckets
            .values()
            .flat_map(|b| pick(b).iter())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        set.into_iter().collect()
    }
}
