use super::{QuotaRow, UsageRow};
use crate::limits::{Resource, SourceReading, Window};

/// Picks the quota row for the target model, falling back to the first row.
/// The flag is `false` when the fallback was taken.
pub fn select_quota_row<'a>(rows: &'a [QuotaRow], target_model: &str) -> Option<(&'a QuotaRow, bool)> {
    if let Some(row) = rows.iter().find(|row| row.model_id == target_model) {
        return Some((row, true));
    }
    rows.first().map(|row| (row, false))
}

/// Usage row for the same model and region, else the same model in any region.
pub fn match_usage_row<'a>(rows: &'a [UsageRow], quota: &QuotaRow) -> Option<&'a UsageRow> {
    let same_model = |row: &&UsageRow| row.model_id == quota.model_id;
    rows.iter()
        .filter(same_model)
        .find(|row| row.region_id == quota.region_id)
        .or_else(|| rows.iter().find(same_model))
}

/// Builds the normalized reading from quota rows and, when the usage query
/// succeeded, its rows. Unmatched usage leaves every `used` unknown.
pub fn reading_from_rows(
    quotas: &[QuotaRow],
    usage: Option<&[UsageRow]>,
    target_model: &str,
) -> SourceReading {
    let mut reading = SourceReading::default();
    reading.sources.quota = true;

    let Some((quota, exact)) = select_quota_row(quotas, target_model) else {
        reading
            .notes
            .push("no quota rows returned for this organization".to_string());
        return reading;
    };
    if !exact {
        tracing::warn!(
            target_model,
            selected = %quota.model_id,
            rows = quotas.len(),
            "no quota row for configured model; using first row"
        );
        reading.notes.push(format!(
            "no quota for {target_model}; showing {}",
            quota.model_id
        ));
    }

    reading.model_id = Some(quota.model_id.clone()).filter(|id| !id.is_empty());
    reading.region_id = quota.region_id.clone();
    reading.max_sequence_length = quota.max_sequence_length.filter(|v| *v > 0).map(|v| v as u64);
    reading.max_completion_tokens = quota
        .max_completion_tokens
        .filter(|v| *v > 0)
        .map(|v| v as u64);

    let matched = match usage {
        Some(rows) => {
            let matched = match_usage_row(rows, quota);
            if matched.is_none() {
                tracing::debug!(model = %quota.model_id, rows = rows.len(), "no usage row matched");
                reading
                    .notes
                    .push("no usage counters for this model; assuming full capacity".to_string());
            }
            matched
        }
        None => None,
    };

    for window in Window::ALL {
        for resource in Resource::ALL {
            let raw = reading.quotas.get_mut(window, resource);
            raw.limit = quota.limit(window, resource);
            raw.used = matched.and_then(|row| row.used(window, resource));
        }
    }
    reading
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(model: &str, region: Option<&str>, requests_per_day: i64) -> QuotaRow {
        QuotaRow {
            model_id: model.to_string(),
            region_id: region.map(str::to_string),
            requests_per_day: Some(requests_per_day),
            tokens_per_minute: Some(275_000),
            ..QuotaRow::default()
        }
    }

    fn usage(model: &str, region: Option<&str>, rpd: i64) -> UsageRow {
        UsageRow {
            model_id: model.to_string(),
            region_id: region.map(str::to_string),
            rpd: Some(rpd),
            tpm: Some(1_000),
            ..UsageRow::default()
        }
    }

    #[test]
    fn selects_row_for_target_model() {
        let rows = vec![quota("llama", None, 1), quota("qwen", None, 2)];
        let (row, exact) = select_quota_row(&rows, "qwen").unwrap();
        assert!(exact);
        assert_eq!(row.requests_per_day, Some(2));
    }

    #[test]
    fn falls_back_to_first_row_deterministically() {
        let rows = vec![quota("llama", None, 1), quota("qwen", None, 2)];
        let (row, exact) = select_quota_row(&rows, "gpt-oss").unwrap();
        assert!(!exact);
        assert_eq!(row.model_id, "llama");

        let reading = reading_from_rows(&rows, Some(&[][..]), "gpt-oss");
        assert_eq!(reading.model_id.as_deref(), Some("llama"));
        assert!(reading.notes.iter().any(|note| note.contains("gpt-oss")));
        assert!(select_quota_row(&[], "qwen").is_none());
    }

    #[test]
    fn prefers_exact_region_match() {
        let selected = quota("qwen", Some("eu"), 100);
        let rows = vec![usage("qwen", Some("us"), 10), usage("qwen", Some("eu"), 20)];
        assert_eq!(match_usage_row(&rows, &selected).unwrap().rpd, Some(20));
    }

    #[test]
    fn falls_back_to_model_only_match() {
        let selected = quota("qwen", Some("eu"), 100);
        let rows = vec![usage("llama", Some("eu"), 5), usage("qwen", Some("us"), 10)];
        assert_eq!(match_usage_row(&rows, &selected).unwrap().rpd, Some(10));
        assert!(match_usage_row(&rows[..1], &selected).is_none());
    }

    #[test]
    fn matched_usage_becomes_direct_counters() {
        let quotas = vec![quota("qwen", Some("us"), 28_800)];
        let rows = vec![usage("qwen", Some("us"), 1_207)];
        let reading = reading_from_rows(&quotas, Some(rows.as_slice()), "qwen");
        let day = reading.quotas.get(Window::Day, Resource::Requests);
        assert_eq!(day.limit, Some(28_800));
        assert_eq!(day.used, Some(1_207));
        let settled = day.settle();
        assert_eq!(settled.remaining, 27_593);
        assert!(reading.notes.is_empty());
    }

    #[test]
    fn unmatched_usage_defaults_to_full_remaining() {
        let quotas = vec![quota("qwen", Some("us"), 28_800)];
        let rows = vec![usage("llama", Some("us"), 99)];
        for usage in [Some(rows.as_slice()), None] {
            let reading = reading_from_rows(&quotas, usage, "qwen");
            for (_, _, raw) in reading.quotas.iter() {
                let settled = raw.settle();
                if settled.limit > 0 {
                    assert_eq!(settled.used, 0);
                    assert_eq!(settled.remaining, settled.limit);
                }
            }
        }
    }

    #[test]
    fn metadata_is_copied_from_selected_row() {
        let mut row = quota("qwen", Some("us"), 1);
        row.max_sequence_length = Some(131_072);
        row.max_completion_tokens = Some(-1);
        let reading = reading_from_rows(&[row], None, "qwen");
        assert_eq!(reading.max_sequence_length, Some(131_072));
        assert_eq!(reading.max_completion_tokens, None);
        assert_eq!(reading.region_id.as_deref(), Some("us"));
    }
}
