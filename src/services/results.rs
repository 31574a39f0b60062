//! Publication of finished races into a cumulative HTML results document.

use std::{
    fmt::Write as _,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{fs, process::Command, sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::ResultsConfig,
    dto::format_system_time,
    state::race::{Race, Rider},
};

const DOCUMENT_HEAD: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Race results</title>\n</head>\n<body>\n<h1>Race results</h1>\n";
const BODY_END: &str = "</body>";

/// Errors raised while publishing results. They never affect the race state.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to access results document {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("publish command `{program}` could not be started")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("publish command `{program}` exited with {status}")]
    CommandFailed { program: String, status: String },
}

/// Sink for finished races.
pub trait ResultsPublisher: Send + Sync {
    /// Publish the final snapshot of `race`.
    fn publish(&self, race: Race) -> BoxFuture<'static, Result<(), PublishError>>;
}

/// Sending side of the results worker.
#[derive(Clone)]
pub struct ResultsHandle {
    tx: mpsc::UnboundedSender<Race>,
}

impl ResultsHandle {
    /// Spawn the worker task; races are published one at a time in submission order.
    pub fn spawn(publisher: Arc<dyn ResultsPublisher>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Race>();
        let worker = tokio::spawn(async move {
            while let Some(race) = rx.recv().await {
                let race_id = race.id.clone();
                match publisher.publish(race).await {
                    Ok(()) => info!(race_id = %race_id, "race results published"),
                    Err(err) => warn!(race_id = %race_id, error = %err, "failed to publish race results"),
                }
            }
        });
        (Self { tx }, worker)
    }

    /// Queue a finished race for publication.
    pub fn submit(&self, race: Race) {
        if let Err(err) = self.tx.send(race) {
            warn!(race_id = %err.0.id, "results worker stopped; race not published");
        }
    }
}

/// Appends one section per finished race to an HTML document on disk.
pub struct HtmlResultsPublisher {
    config: Arc<ResultsConfig>,
}

impl HtmlResultsPublisher {
    pub fn new(config: ResultsConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ResultsPublisher for HtmlResultsPublisher {
    fn publish(&self, race: Race) -> BoxFuture<'static, Result<(), PublishError>> {
        let config = self.config.clone();
        Box::pin(async move {
            let section = render_race_section(&race, SystemTime::now());
            let path = config.document_path.as_path();

            let existing = match fs::read_to_string(path).await {
                Ok(contents) => Some(contents),
                Err(err) if err.kind() == ErrorKind::NotFound => None,
                Err(source) => return Err(io_error(path, source)),
            };
            let document = append_section(existing.as_deref(), &section);
            fs::write(path, document)
                .await
                .map_err(|source| io_error(path, source))?;

            if let Some(mirror) = &config.mirror_path {
                fs::copy(path, mirror)
                    .await
                    .map_err(|source| io_error(mirror, source))?;
            }

            if let Some(command) = &config.publish_command {
                run_publish_command(command).await?;
            }
            Ok(())
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn run_publish_command(command: &[String]) -> Result<(), PublishError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| PublishError::Spawn {
            program: program.clone(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(PublishError::CommandFailed {
            program: program.clone(),
            status: status.to_string(),
        })
    }
}

/// Insert `section` before the closing body tag, or start a new document.
pub fn append_section(existing: Option<&str>, section: &str) -> String {
    match existing {
        Some(document) => match document.rfind(BODY_END) {
            Some(index) => {
                let mut updated = String::with_capacity(document.len() + section.len());
                updated.push_str(&document[..index]);
                updated.push_str(section);
                updated.push_str(&document[index..]);
                updated
            }
            None => format!("{document}{section}"),
        },
        None => format!("{DOCUMENT_HEAD}{section}{BODY_END}\n</html>\n"),
    }
}

/// Render the results of one race: a table per class in ranking order.
pub fn render_race_section(race: &Race, finished_at: SystemTime) -> String {
    let mut html = String::new();
    let _ = writeln!(html, "<section class=\"race\" data-race-id=\"{}\">", escape_html(&race.id));
    let _ = writeln!(html, "<h2>{}</h2>", escape_html(&race.name));
    let _ = writeln!(
        html,
        "<p>Finished {}</p>",
        escape_html(&format_system_time(finished_at))
    );

    for (class, indices) in race.ranked_groups() {
        let riders: Vec<&Rider> = indices.iter().map(|&index| &race.riders[index]).collect();
        let lap_columns = riders.iter().map(|rider| rider.lap_times.len()).max().unwrap_or(0);
        let label = if class.is_empty() { "Unclassified" } else { class };

        let _ = writeln!(html, "<h3>{}</h3>", escape_html(label));
        html.push_str("<table>\n<thead><tr><th>Pos</th><th>Rider</th>");
        for lap in 1..=lap_columns {
            let _ = write!(html, "<th>Lap {lap}</th>");
        }
        html.push_str("<th>Total</th><th>Avg lap</th><th>Penalty</th></tr></thead>\n<tbody>\n");

        for (rank, rider) in riders.iter().enumerate() {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}#{}</td>",
                rank + 1,
                escape_html(&rider.name),
                escape_html(&rider.number)
            );
            for lap in 0..lap_columns {
                match rider.lap_times.get(lap) {
                    Some(&ms) => {
                        let _ = write!(html, "<td>{}</td>", format_duration(ms));
                    }
                    None => html.push_str("<td></td>"),
                }
            }
            let average = rider
                .average_lap_ms()
                .map(format_duration)
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(
                html,
                "<td>{}</td><td>{}</td><td>{}</td></tr>",
                format_duration(rider.ranking_time()),
                average,
                format_duration(rider.penalty_ms)
            );
        }
        html.push_str("</tbody>\n</table>\n");
    }

    html.push_str("</section>\n");
    html
}

/// Format milliseconds as `m:ss.mmm`.
pub fn format_duration(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{minutes}:{seconds:02}.{millis:03}")
}

/// Escape text for use inside HTML elements and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_race() -> Race {
        let mut race = Race::new("r1".into(), "Heat <1>".into(), 20);
        let mut fast = Rider::new("a".into(), "7".into(), "Ann & Co".into(), "Cross".into());
        fast.record_lap(61_500, 1);
        fast.record_lap(59_000, 2);
        let mut slow = Rider::new("b".into(), "12".into(), "Bob".into(), "Cross".into());
        slow.record_lap(70_000, 3);
        slow.add_penalty();
        let junior = Rider::new("c".into(), "3".into(), "Cid".into(), "Junior".into());
        race.riders = vec![slow, fast, junior];
        race
    }

    #[test]
    fn durations_use_minutes_seconds_millis() {
        assert_eq!(format_duration(0), "0:00.000");
        assert_eq!(format_duration(61_500), "1:01.500");
        assert_eq!(format_duration(3_600_007), "60:00.007");
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn section_lists_classes_in_ranking_order() {
        let html = render_race_section(&finished_race(), SystemTime::UNIX_EPOCH);

        assert!(html.contains("<h2>Heat &lt;1&gt;</h2>"));
        assert!(html.contains("<h3>Cross</h3>"));
        assert!(html.contains("<h3>Junior</h3>"));
        assert!(html.contains("<th>Lap 2</th>"));
        let ann = html.find("Ann &amp; Co#7").unwrap();
        let bob = html.find("Bob#12").unwrap();
        assert!(ann < bob);
        assert!(html.contains("<td>1:15.000</td>"));
        assert!(html.contains("<td>0:05.000</td></tr>"));
    }

    #[test]
    fn append_inserts_before_body_end() {
        let created = append_section(None, "<section>one</section>\n");
        assert!(created.starts_with("<!DOCTYPE html>"));
        assert!(created.trim_end().ends_with("</html>"));

        let updated = append_section(Some(&created), "<section>two</section>\n");
        let one = updated.find("one").unwrap();
        let two = updated.find("two").unwrap();
        let body_end = updated.find(BODY_END).unwrap();
        assert!(one < two && two < body_end);
    }

    #[tokio::test]
    async fn publishing_twice_appends_two_sections() {
        let dir = tempfile::tempdir().unwrap();
        let document_path = dir.path().join("results.html");
        let mirror_path = dir.path().join("public.html");
        let publisher = HtmlResultsPublisher::new(ResultsConfig {
            document_path: document_path.clone(),
            mirror_path: Some(mirror_path.clone()),
            publish_command: None,
        });

        publisher.publish(finished_race()).await.unwrap();
        publisher.publish(finished_race()).await.unwrap();

        let document = std::fs::read_to_string(&document_path).unwrap();
        assert_eq!(document.matches("<section class=\"race\"").count(), 2);
        assert_eq!(document.matches(BODY_END).count(), 1);
        assert_eq!(std::fs::read_to_string(&mirror_path).unwrap(), document);
    }

    struct RecordingPublisher {
        published: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl ResultsPublisher for RecordingPublisher {
        fn publish(&self, race: Race) -> BoxFuture<'static, Result<(), PublishError>> {
            let published = self.published.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                published.lock().unwrap().push(race.id);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn worker_publishes_queued_races_before_stopping() {
        let published = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (handle, worker) = ResultsHandle::spawn(Arc::new(RecordingPublisher {
            published: published.clone(),
        }));

        handle.submit(Race::new("first".into(), "Heat 1".into(), 10));
        handle.submit(Race::new("second".into(), "Heat 2".into(), 10));
        drop(handle);
        worker.await.unwrap();

        assert_eq!(*published.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_publish_command_is_reported_after_writing() {
        let dir = tempfile::tempdir().unwrap();
        let document_path = dir.path().join("results.html");
        let publisher = HtmlResultsPublisher::new(ResultsConfig {
            document_path: document_path.clone(),
            mirror_path: None,
            publish_command: Some(vec!["false".into()]),
        });

        let outcome = publisher.publish(finished_race()).await;

        assert!(matches!(
            outcome,
            Err(PublishError::CommandFailed { ref program, .. }) if program == "false"
        ));
        let document = std::fs::read_to_string(&document_path).unwrap();
        assert!(document.contains("Heat &lt;1&gt;"));
    }

    #[tokio::test]
    async fn missing_publish_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = HtmlResultsPublisher::new(ResultsConfig {
            document_path: dir.path().join("results.html"),
            mirror_path: None,
            publish_command: Some(vec![
                dir.path().join("no-such-script").display().to_string(),
            ]),
        });

        let outcome = publisher.publish(finished_race()).await;

        assert!(matches!(outcome, Err(PublishError::Spawn { .. })));
    }
}
