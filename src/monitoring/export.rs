//! Metric export formats

use super::error::MonitoringResult;
use super::metrics::Metric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Export format for recorded metrics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

/// Render metric series, keyed by name
pub fn export_metrics(
    series: &BTreeMap<String, Vec<Metric>>,
    format: ExportFormat,
) -> MonitoringResult<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(series)?),
        ExportFormat::Csv => Ok(export_csv(series)),
    }
}

fn export_csv(series: &BTreeMap<String, Vec<Metric>>) -> String {
    let mut csv = String::from("timestamp,name,type,value,labels\n");

    for metric in series.values().flatten() {
        let mut labels: Vec<String> = metric
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        labels.sort();

        csv.push_str(&format!(
            "{},{},{},{},{}\n",
            metric.timestamp.to_rfc3339(),
            escape_csv(&metric.name),
            metric.metric_type,
            metric.value,
            escape_csv(&labels.join(";"))
        ));
    }

    csv
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::MetricType;
    use chrono::Utc;
    use std::collections::HashMap;

    fn series() -> BTreeMap<String, Vec<Metric>> {
        let mut labels = HashMap::new();
        labels.insert("queue".to_string(), "jobs".to_string());
        labels.insert("agent_id".to_string(), "a,1".to_string());

        let mut map = BTreeMap::new();
        map.insert(
            "messages_sent".to_string(),
            vec![Metric {
                name: "messages_sent".to_string(),
                metric_type: MetricType::Counter,
                value: 1.0,
                labels,
                timestamp: Utc::now(),
                metadata: HashMap::new(),
            }],
        );
        map
    }

    #[test]
    fn test_csv_export() {
        let csv = export_metrics(&series(), ExportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "timestamp,name,type,value,labels");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(",messages_sent,counter,1,"));
        assert!(lines[1].ends_with("\"agent_id=a,1;queue=jobs\""));
    }

    #[test]
    fn test_json_export() {
        let json = export_metrics(&series(), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["messages_sent"][0]["value"], 1.0);
        assert_eq!(value["messages_sent"][0]["metric_type"], "counter");
    }
}
