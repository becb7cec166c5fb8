//! Metadata-based message resolution
//!
//! Resolution runs in three stages: an optional legacy id translation, a
//! coarse remote query built by [`ODataFilter`], and local validation that
//! picks the single most recent candidate. Every failure that can be
//! detected locally is raised before the backend is contacted.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};

use crate::criteria::{ResolutionPolicy, SearchCriteria};
use crate::errors::{AppError, AppResult};
use crate::filter::{CANDIDATE_LIMIT, CANDIDATE_SELECT, ODataFilter};
use crate::graph::{CallContext, MailBackend, MessageQuery};
use crate::message_id::MessageId;
use crate::models::MessageSummary;

/// Outcome of local validation over a candidate set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Selected(MessageId),
    /// The remote query returned nothing
    NoCandidates,
    /// Candidates were returned but all failed validation
    NoneValidated { rejected: usize },
}

impl Selection {
    /// Collapse both empty outcomes into `NotFound`
    pub fn into_result(self) -> AppResult<MessageId> {
        match self {
            Self::Selected(id) => Ok(id),
            Self::NoCandidates => Err(AppError::NotFound(
                "no message matched the search criteria".to_owned(),
            )),
            Self::NoneValidated { rejected } => Err(AppError::NotFound(format!(
                "{rejected} candidate(s) returned but none matched the criteria"
            ))),
        }
    }
}

/// Pick the most recent candidate that passes every local predicate
///
/// Pure over its inputs. Candidates are stably sorted by receive time,
/// newest first, so equal timestamps keep their backend order. Candidates
/// without a timestamp rank after all dated ones.
pub fn select_candidate(candidates: &[MessageSummary], criteria: &SearchCriteria) -> Selection {
    if candidates.is_empty() {
        return Selection::NoCandidates;
    }

    let expected = criteria.expected_recipients();
    let mut accepted: Vec<&MessageSummary> = candidates
        .iter()
        .filter(|c| subject_matches(c, criteria.subject.as_deref()))
        .filter(|c| recipients_match(c, &expected))
        .collect();

    // Option orders None first, so reversing puts undated candidates last.
    accepted.sort_by(|a, b| b.received_at.cmp(&a.received_at));

    match accepted.first() {
        Some(best) => Selection::Selected(best.id.clone()),
        None => Selection::NoneValidated {
            rejected: candidates.len(),
        },
    }
}

/// Case-insensitive trimmed subject equality; vacuous without a subject
pub fn subject_matches(candidate: &MessageSummary, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    candidate
        .subject
        .as_deref()
        .is_some_and(|s| s.trim().to_lowercase() == expected.trim().to_lowercase())
}

/// Every expected address must be on the candidate; extras are tolerated
pub fn recipients_match(candidate: &MessageSummary, expected: &BTreeSet<String>) -> bool {
    expected.is_subset(&candidate.recipients)
}

/// Resolves loose criteria to exactly one message id
pub struct MessageResolver<'a> {
    backend: &'a dyn MailBackend,
    policy: ResolutionPolicy,
}

impl<'a> MessageResolver<'a> {
    pub fn new(backend: &'a dyn MailBackend, policy: ResolutionPolicy) -> Self {
        Self { backend, policy }
    }

    /// Resolve criteria to a single message id
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when nothing discriminating was supplied or the policy
    ///   requires a missing field (no backend call is made)
    /// - `NotFound` when nothing matched, or the legacy id has no native
    ///   equivalent and `fallback_to_search` is off
    /// - `RemoteQuery` when the candidate query failed
    /// - other backend errors from translation, unchanged, when
    ///   `fallback_to_search` is off
    #[instrument(skip_all, fields(request_id = ctx.request_id(), fallback = fallback_to_search))]
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        criteria: &SearchCriteria,
        fallback_to_search: bool,
    ) -> AppResult<MessageId> {
        self.policy.check_required(criteria)?;
        criteria.ensure_discriminating()?;

        if let Some(legacy) = &criteria.legacy_id
            && self.policy.translate_legacy_id
        {
            match self.backend.translate_legacy_id(ctx, legacy).await {
                Ok(id) => {
                    info!(message_id = %id, "resolved via legacy id translation");
                    return Ok(id);
                }
                Err(e @ (AppError::Unauthorized(_) | AppError::Timeout(_))) => return Err(e),
                Err(AppError::NotFound(reason)) if !fallback_to_search => {
                    return Err(AppError::NotFound(format!(
                        "legacy id could not be translated: {reason}"
                    )));
                }
                Err(e) if !fallback_to_search => return Err(e),
                Err(e) => warn!(error = %e, "legacy id translation failed, searching metadata"),
            }
        }

        let remaining = SearchCriteria {
            legacy_id: None,
            ..criteria.clone()
        };
        remaining.ensure_discriminating()?;
        self.resolve_by_metadata(ctx, &remaining).await
    }

    async fn resolve_by_metadata(
        &self,
        ctx: &CallContext,
        criteria: &SearchCriteria,
    ) -> AppResult<MessageId> {
        let filter = ODataFilter::build(criteria, &self.policy)?;
        let query = MessageQuery {
            filter: filter.to_string(),
            select: CANDIDATE_SELECT,
            top: CANDIDATE_LIMIT,
        };
        debug!(filter = %query.filter, clauses = filter.clauses().len(), "querying candidates");

        let candidates = self
            .backend
            .list_messages(ctx, &query)
            .await
            .map_err(|e| match e {
                AppError::Remote { code, message } => AppError::RemoteQuery { message, code },
                AppError::Internal(message) => AppError::RemoteQuery {
                    message,
                    code: None,
                },
                other => other,
            })?;

        let selection = select_candidate(&candidates, criteria);
        match &selection {
            Selection::Selected(id) => {
                info!(message_id = %id, candidates = candidates.len(), "message resolved");
            }
            Selection::NoCandidates => info!("no candidates returned"),
            Selection::NoneValidated { rejected } => {
                info!(rejected, "all candidates failed local validation");
            }
        }
        selection.into_result()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, TimeZone, Utc};
    use secrecy::SecretString;

    use super::{MessageResolver, Selection, select_candidate};
    use crate::criteria::{ResolutionPolicy, SearchCriteria};
    use crate::errors::AppError;
    use crate::graph::CallContext;
    use crate::message_id::{LegacyItemId, MessageId};
    use crate::mock::MockBackend;
    use crate::models::MessageSummary;

    fn ctx() -> CallContext {
        CallContext::new(SecretString::from("token".to_owned()), "req-test")
    }

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap())
    }

    fn summary(
        id: &str,
        subject: &str,
        received_at: Option<DateTime<Utc>>,
        to: &[&str],
    ) -> MessageSummary {
        MessageSummary {
            id: MessageId::parse(id).expect("valid id"),
            received_at,
            subject: Some(subject.to_owned()),
            recipients: to.iter().map(|s| (*s).to_owned()).collect::<BTreeSet<_>>(),
        }
    }

    fn criteria(subject: &str, recipients: Option<&str>) -> SearchCriteria {
        SearchCriteria {
            subject: Some(subject.to_owned()),
            recipients: recipients.map(str::to_owned),
            ..SearchCriteria::default()
        }
    }

    fn selected(selection: Selection) -> String {
        match selection {
            Selection::Selected(id) => id.as_str().to_owned(),
            other => panic!("expected a selection, got {other:?}"),
        }
    }

    #[test]
    fn q3_report_scenario_selects_latest_full_match() {
        let candidates = vec![
            summary("1", "Q3 Report", at(10), &["a@x.com", "b@x.com", "c@x.com"]),
            summary("2", "q3 report ", at(12), &["a@x.com"]),
            summary("3", "Q3 Report", at(9), &["a@x.com", "b@x.com"]),
        ];
        let selection =
            select_candidate(&candidates, &criteria("Q3 Report", Some("A@x.com; b@x.com")));
        assert_eq!(selected(selection), "1");
    }

    #[test]
    fn later_timestamp_wins_regardless_of_order() {
        let older = summary("old", "s", at(8), &[]);
        let newer = summary("new", "s", at(11), &[]);
        let c = criteria("s", None);

        assert_eq!(selected(select_candidate(&[older.clone(), newer.clone()], &c)), "new");
        assert_eq!(selected(select_candidate(&[newer, older], &c)), "new");
    }

    #[test]
    fn equal_timestamps_keep_backend_order() {
        let candidates = vec![
            summary("first", "s", at(9), &[]),
            summary("second", "s", at(9), &[]),
        ];
        assert_eq!(selected(select_candidate(&candidates, &criteria("s", None))), "first");
    }

    #[test]
    fn undated_candidates_rank_last() {
        let candidates = vec![
            summary("undated", "s", None, &[]),
            summary("dated", "s", at(1), &[]),
        ];
        assert_eq!(selected(select_candidate(&candidates, &criteria("s", None))), "dated");
    }

    #[test]
    fn empty_expected_recipients_accept_every_candidate() {
        let candidates = vec![summary("bare", "s", at(9), &[])];
        assert_eq!(selected(select_candidate(&candidates, &criteria("s", Some(" ; ;")))), "bare");
    }

    #[test]
    fn missing_expected_recipient_excludes_candidate() {
        let candidates = vec![
            summary("1", "s", at(9), &["a@x.com"]),
            summary("2", "s", at(10), &[]),
        ];
        let selection = select_candidate(&candidates, &criteria("s", Some("a@x.com;b@x.com")));
        assert_eq!(selection, Selection::NoneValidated { rejected: 2 });
    }

    #[test]
    fn empty_candidate_set_is_distinguished() {
        assert_eq!(select_candidate(&[], &criteria("s", None)), Selection::NoCandidates);
    }

    #[tokio::test]
    async fn no_discriminator_fails_without_backend_calls() {
        let backend = MockBackend::default();
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);
        let only_recipients = SearchCriteria {
            recipients: Some("a@x.com".to_owned()),
            received_at: at(9),
            ..SearchCriteria::default()
        };

        let err = resolver
            .resolve(&ctx(), &only_recipients, false)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn subject_time_requires_received_at() {
        let backend = MockBackend::default();
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::SUBJECT_TIME);

        let err = resolver
            .resolve(&ctx(), &criteria("Q3 Report", None), false)
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("received_at is required"));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn issues_one_bounded_query_and_resolves() {
        let backend = MockBackend::with_candidates(vec![
            summary("1", "Q3 Report", at(10), &["a@x.com", "b@x.com"]),
            summary("2", "Q3 Report", at(12), &["a@x.com"]),
        ]);
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let id = resolver
            .resolve(&ctx(), &criteria("Q3 Report", Some("a@x.com;b@x.com")), false)
            .await
            .expect("resolves");
        assert_eq!(id.as_str(), "1");

        let queries = backend.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].top, 10);
        assert_eq!(queries[0].filter, "subject eq 'Q3 Report'");
    }

    #[tokio::test]
    async fn remote_failure_is_a_query_error_without_retry() {
        let backend = MockBackend {
            list_error: Some(|| AppError::Remote {
                code: Some("query_too_complex".to_owned()),
                message: "The restriction or sort order is too complex".to_owned(),
            }),
            ..MockBackend::default()
        };
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let err = resolver
            .resolve(&ctx(), &criteria("Q3 Report", None), false)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::RemoteQuery { .. }));
        assert_eq!(err.code(), "query_too_complex");
        assert_eq!(backend.calls(), ["list_messages"]);
    }

    #[tokio::test]
    async fn undecodable_candidate_list_is_a_query_error() {
        let backend = MockBackend {
            list_error: Some(|| {
                AppError::Internal("failed to decode list messages response".to_owned())
            }),
            ..MockBackend::default()
        };
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let err = resolver
            .resolve(&ctx(), &criteria("Q3 Report", None), false)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::RemoteQuery { .. }));
        assert_eq!(err.code(), "search_failed");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn nothing_found_maps_to_not_found() {
        let backend = MockBackend::default();
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);
        let err = resolver
            .resolve(&ctx(), &criteria("missing", None), false)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    fn legacy(subject: Option<&str>) -> SearchCriteria {
        SearchCriteria {
            subject: subject.map(str::to_owned),
            legacy_id: Some(LegacyItemId::parse("EWS-legacy").expect("valid id")),
            ..SearchCriteria::default()
        }
    }

    #[tokio::test]
    async fn translated_legacy_id_short_circuits_search() {
        let backend = MockBackend {
            translation: Some(MessageId::parse("AAMk-native").expect("valid id")),
            ..MockBackend::default()
        };
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let id = resolver
            .resolve(&ctx(), &legacy(Some("Q3 Report")), false)
            .await
            .expect("resolves");
        assert_eq!(id.as_str(), "AAMk-native");
        assert_eq!(backend.calls(), ["translate_legacy_id"]);
    }

    #[tokio::test]
    async fn failed_translation_without_fallback_is_fatal() {
        let backend = MockBackend::with_candidates(vec![summary("1", "Q3 Report", at(9), &[])]);
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let err = resolver
            .resolve(&ctx(), &legacy(Some("Q3 Report")), false)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(backend.calls(), ["translate_legacy_id"]);
    }

    #[tokio::test]
    async fn translation_outage_without_fallback_keeps_server_error_status() {
        let backend = MockBackend {
            translate_error: Some(|| AppError::Remote {
                code: Some("unreachable".to_owned()),
                message: "translate legacy id failed: connection refused".to_owned(),
            }),
            ..MockBackend::with_candidates(vec![summary("1", "Q3 Report", at(9), &[])])
        };
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let err = resolver
            .resolve(&ctx(), &legacy(Some("Q3 Report")), false)
            .await
            .expect_err("must fail");
        assert!(err.status().is_server_error());
        assert_eq!(err.code(), "unreachable");
        assert_eq!(backend.calls(), ["translate_legacy_id"]);
    }

    #[tokio::test]
    async fn translation_outage_with_fallback_searches_metadata() {
        let backend = MockBackend {
            translate_error: Some(|| AppError::Internal("undecodable response".to_owned())),
            ..MockBackend::with_candidates(vec![summary("1", "Q3 Report", at(9), &[])])
        };
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let id = resolver
            .resolve(&ctx(), &legacy(Some("Q3 Report")), true)
            .await
            .expect("resolves");
        assert_eq!(id.as_str(), "1");
    }

    #[tokio::test]
    async fn failed_translation_with_fallback_searches_metadata() {
        let backend = MockBackend::with_candidates(vec![summary("1", "Q3 Report", at(9), &[])]);
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let id = resolver
            .resolve(&ctx(), &legacy(Some("Q3 Report")), true)
            .await
            .expect("resolves");
        assert_eq!(id.as_str(), "1");
        assert_eq!(backend.calls(), ["translate_legacy_id", "list_messages"]);
    }

    #[tokio::test]
    async fn fallback_without_remaining_discriminator_is_input_error() {
        let backend = MockBackend::default();
        let resolver = MessageResolver::new(&backend, ResolutionPolicy::STANDARD);

        let err = resolver
            .resolve(&ctx(), &legacy(None), true)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(backend.calls(), ["translate_legacy_id"]);
    }
}
