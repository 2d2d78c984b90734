//! 메트릭 집계기.
//!
//! 구간 [start, end)의 메트릭 행을 id 순서로 페이지 단위로 읽어 이벤트 타입별로
//! 누적한 뒤, 키마다 한 행을 upsert한다. 같은 구간을 다시 돌리면 같은 행이 나온다.

use chrono::{DateTime, Utc};
use dualagent_core::error::CoreError;
use dualagent_core::models::aggregate::{
    AggregateKey, AggregatedMetricRow, ExceptionCount, Granularity,
};
use dualagent_core::models::metric::{MetricDetail, MetricRow};
use dualagent_core::ports::storage::MetricStore;
use dualagent_core::LOG_MARKER;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// 상위 예외 클래스 수
const TOP_EXCEPTIONS: usize = 10;

/// 한 구간 집계 결과
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    pub granularity: Granularity,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub rows_scanned: usize,
    pub aggregates: Vec<AggregatedMetricRow>,
}

/// 메트릭 집계기
pub struct Aggregator {
    store: Arc<dyn MetricStore>,
    batch_size: usize,
}

impl Aggregator {
    pub fn new(store: Arc<dyn MetricStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// `at`을 포함하는 구간 집계 후 저장
    pub async fn aggregate(
        &self,
        granularity: Granularity,
        at: DateTime<Utc>,
    ) -> Result<AggregationReport, CoreError> {
        let (start, end) = granularity.window(at);
        let mut accumulators: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut after_id = 0i64;
        let mut scanned = 0usize;

        loop {
            let page = self
                .store
                .rows_in_window(start, end, after_id, self.batch_size)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;
            scanned += page.len();
            let full_page = page.len() >= self.batch_size;

            for stored in &page {
                accumulators
                    .entry(stored.row.event_type.as_str().to_string())
                    .or_default()
                    .add(&stored.row);
            }

            if !full_page {
                break;
            }
        }

        let mut aggregates = Vec::with_capacity(accumulators.len());
        for (event_type, acc) in accumulators {
            let row = acc.finish(granularity.key_for(&event_type, start));
            self.store.upsert_aggregate(&row).await?;
            aggregates.push(row);
        }

        debug!(
            "{LOG_MARKER} {granularity} 집계 {start} ~ {end}: {scanned}행 → {}건",
            aggregates.len()
        );

        Ok(AggregationReport {
            granularity,
            window_start: start,
            window_end: end,
            rows_scanned: scanned,
            aggregates,
        })
    }

    /// 스케줄 실행: 직전 시간 구간과 그 시각을 포함하는 일/주 구간
    pub async fn run_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AggregationReport>, CoreError> {
        let previous_hour = Granularity::Hourly.previous_window_point(now);
        let mut reports = Vec::with_capacity(3);

        for granularity in [Granularity::Hourly, Granularity::Daily, Granularity::Weekly] {
            reports.push(self.aggregate(granularity, previous_hour).await?);
        }

        let total: usize = reports.iter().map(|r| r.aggregates.len()).sum();
        info!("{LOG_MARKER} 스케줄 집계 완료: 기준 {previous_hour}, {total}건 저장");
        Ok(reports)
    }
}

/// 이벤트 타입별 누적기
#[derive(Default)]
struct Accumulator {
    total: u64,
    users: BTreeSet<String>,
    sessions: BTreeSet<String>,
    durations: Vec<f64>,
    status: [u64; 4],
    queries: u64,
    query_durations: Vec<f64>,
    exceptions: u64,
    exception_classes: BTreeMap<String, u64>,
    jobs_queued: u64,
    jobs_completed: u64,
    jobs_failed: u64,
    memory_sum: u128,
    memory_count: u64,
    memory_peak: Option<u64>,
}

impl Accumulator {
    fn add(&mut self, row: &MetricRow) {
        self.total += 1;
        if let Some(user) = &row.user_id {
            self.users.insert(user.clone());
        }
        if let Some(session) = &row.session_id {
            self.sessions.insert(session.clone());
        }
        if let Some(duration) = row.duration() {
            self.durations.push(duration);
        }

        match &row.detail {
            MetricDetail::Request(request) => {
                if let Some(code) = request.status_code {
                    match code {
                        200..=299 => self.status[0] += 1,
                        300..=399 => self.status[1] += 1,
                        400..=499 => self.status[2] += 1,
                        500..=599 => self.status[3] += 1,
                        _ => {}
                    }
                }
                if let Some(memory) = request.memory_usage {
                    self.memory_sum += u128::from(memory);
                    self.memory_count += 1;
                    self.memory_peak = Some(self.memory_peak.map_or(memory, |p| p.max(memory)));
                }
            }
            MetricDetail::Query(query) => {
                self.queries += 1;
                if let Some(duration) = query.duration {
                    self.query_durations.push(duration);
                }
            }
            MetricDetail::Exception(exception) => {
                self.exceptions += 1;
                let class = exception
                    .class
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                *self.exception_classes.entry(class).or_default() += 1;
            }
            MetricDetail::Job(job) => match job.status.as_str() {
                "queued" | "processing" => self.jobs_queued += 1,
                "completed" | "processed" | "success" => self.jobs_completed += 1,
                "failed" => self.jobs_failed += 1,
                _ => {}
            },
            _ => {}
        }
    }

    fn finish(mut self, key: AggregateKey) -> AggregatedMetricRow {
        self.durations.sort_by(f64::total_cmp);

        let mut top: Vec<ExceptionCount> = self
            .exception_classes
            .into_iter()
            .map(|(class, count)| ExceptionCount { class, count })
            .collect();
        // 건수 내림차순, 같으면 클래스 이름 오름차순 (BTreeMap 순서 유지)
        top.sort_by(|a, b| b.count.cmp(&a.count));
        top.truncate(TOP_EXCEPTIONS);

        // 정수 반올림 평균. 평균은 최대값을 넘지 않으므로 u64에 들어간다
        let avg_memory_usage = (self.memory_count > 0)
            .then(|| {
                let count = u128::from(self.memory_count);
                u64::try_from((self.memory_sum + count / 2) / count).ok()
            })
            .flatten();

        AggregatedMetricRow {
            key,
            total_events: self.total,
            unique_users: self.users.len() as u64,
            unique_sessions: self.sessions.len() as u64,
            avg_duration: mean(&self.durations).map(round3),
            min_duration: self.durations.first().copied().map(round3),
            max_duration: self.durations.last().copied().map(round3),
            p95_duration: nearest_rank(&self.durations, 95.0).map(round3),
            p99_duration: nearest_rank(&self.durations, 99.0).map(round3),
            status_2xx: self.status[0],
            status_3xx: self.status[1],
            status_4xx: self.status[2],
            status_5xx: self.status[3],
            total_queries: self.queries,
            avg_query_duration: mean(&self.query_durations).map(round3),
            total_exceptions: self.exceptions,
            top_exceptions: top,
            jobs_queued: self.jobs_queued,
            jobs_completed: self.jobs_completed,
            jobs_failed: self.jobs_failed,
            avg_memory_usage,
            peak_memory_usage: self.memory_peak,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// nearest-rank 백분위수 (정렬된 입력)
fn nearest_rank(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}
