//! The spot module owns launching a spot instance from a template: reading the template,
//! injecting the startup script, placing the request, and reporting the request ID.

pub(crate) mod request;

use crate::{template, user_data, Args};
use log::{debug, error, info};
use request::SpotRequester;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::fs::File;
use std::path::Path;

pub(crate) const USAGE: &str = "Please insert the json path as the first parameter! Terminating...";

/// How a launch ended, short of an error.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// No template was given, so nothing was requested.
    Usage,
    /// Spot requests were placed; the first ID is the one reported.
    Requested { request_ids: Vec<String> },
}

/// If an output path was requested, we save the IDs of the spot requests we placed so later
/// tooling can find them.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct RequestRecord {
    pub(crate) region: String,
    pub(crate) spot_instance_request_ids: Vec<String>,
}

/// Common entrypoint from main()
pub(crate) async fn run<R>(args: &Args, requester: &R) -> Result<Outcome>
where
    R: SpotRequester + Sync,
{
    let outcome = launch(args.template_path.as_deref(), requester).await?;

    if let (Some(path), Outcome::Requested { request_ids }) = (&args.request_output, &outcome) {
        let record = RequestRecord {
            region: requester.region().to_string(),
            spot_instance_request_ids: request_ids.clone(),
        };
        let file = File::create(path).context(error::FileCreateSnafu { path })?;
        serde_json::to_writer_pretty(file, &record).context(error::SerializeSnafu { path })?;
        info!("Wrote spot request data to {}", path.display());
    }

    Ok(outcome)
}

/// Launches a spot instance from the template at the given path.  Without a path, logs the
/// usage error and requests nothing.
pub(crate) async fn launch<R>(template_path: Option<&Path>, requester: &R) -> Result<Outcome>
where
    R: SpotRequester + Sync,
{
    let template_path = match template_path {
        Some(path) => path,
        None => {
            error!("{}", USAGE);
            return Ok(Outcome::Usage);
        }
    };
    info!(
        "Starting the instance deployment from the template \"{}\"",
        template_path.display()
    );

    let mut template = template::load(template_path).context(error::TemplateSnafu)?;
    template::inject_user_data(&mut template, user_data::encoded())
        .context(error::TemplateSnafu)?;
    let request = template::to_request(template).context(error::TemplateSnafu)?;

    let request_ids = requester
        .request_spot_instances(request)
        .await
        .context(error::RequestSnafu)?;
    debug!("Received {} spot request IDs", request_ids.len());

    let (first, rest) = request_ids
        .split_first()
        .context(error::NoSpotRequestsSnafu {
            region: requester.region(),
        })?;
    info!("Spot Request done! Spot Request Id: {}", first);
    for other in rest {
        info!("Additional Spot Request Id: {}", other);
    }

    info!("All done.");
    Ok(Outcome::Requested { request_ids })
}

mod error {
    use crate::aws::spot::request;
    use crate::template;
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to create file '{}': {}", path.display(), source))]
        FileCreate {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Spot request in {} returned no spot instance requests", region))]
        NoSpotRequests { region: String },

        #[snafu(display("{}", source))]
        Request { source: request::Error },

        #[snafu(display("Failed to serialize output to '{}': {}", path.display(), source))]
        Serialize {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("{}", source))]
        Template { source: template::Error },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::request::{self, SpotRequest, SpotRequester};
    use super::{launch, run, Error, Outcome, RequestRecord, USAGE};
    use crate::{logging, template, user_data, Args};
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use clap::Parser;
    use log::LevelFilter;
    use std::ffi::OsString;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Stands in for EC2, answering every request with the same IDs and remembering what it was
    /// asked.
    struct StubRequester {
        request_ids: Vec<String>,
        requests: Mutex<Vec<SpotRequest>>,
    }

    impl StubRequester {
        fn new(request_ids: &[&str]) -> Self {
            Self {
                request_ids: request_ids.iter().map(|id| id.to_string()).collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<SpotRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpotRequester for StubRequester {
        fn region(&self) -> &str {
            "us-east-1"
        }

        async fn request_spot_instances(
            &self,
            request: SpotRequest,
        ) -> request::Result<Vec<String>> {
            self.requests.lock().unwrap().push(request);
            Ok(self.request_ids.clone())
        }
    }

    fn test_template(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("test_templates")
            .join(name)
    }

    #[tokio::test]
    async fn injects_and_requests() {
        let requester = StubRequester::new(&["sir-test0001"]);
        let outcome = launch(Some(&test_template("minimal.json")), &requester)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Requested {
                request_ids: vec!["sir-test0001".to_string()]
            }
        );
        let requests = requester.requests();
        assert_eq!(requests.len(), 1);
        let spec = requests[0].launch_specification.as_ref().unwrap();
        assert_eq!(spec.user_data, Some(user_data::encoded()));
    }

    #[tokio::test]
    async fn missing_launch_specification_requests_nothing() {
        let requester = StubRequester::new(&["sir-test0002"]);
        let err = launch(Some(&test_template("empty.json")), &requester)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Template {
                source: template::Error::MissingField { .. }
            }
        ));
        assert!(requester.requests().is_empty());
    }

    #[tokio::test]
    async fn malformed_template_requests_nothing() {
        let requester = StubRequester::new(&["sir-test0003"]);
        let err = launch(Some(&test_template("malformed.json")), &requester)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Template {
                source: template::Error::ParseTemplate { .. }
            }
        ));
        assert!(requester.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_response_fails() {
        let requester = StubRequester::new(&[]);
        let err = launch(Some(&test_template("minimal.json")), &requester)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSpotRequests { .. }));
    }

    #[tokio::test]
    async fn writes_request_record() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("requests.json");
        let template = test_template("sample.json");
        let args = Args::parse_from([
            OsString::from("spotsys"),
            OsString::from("--request-output"),
            output.clone().into_os_string(),
            template.into_os_string(),
        ]);
        let requester = StubRequester::new(&["sir-test0004", "sir-test0005"]);

        run(&args, &requester).await.unwrap();

        let record: RequestRecord =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(
            record,
            RequestRecord {
                region: "us-east-1".to_string(),
                spot_instance_request_ids: vec![
                    "sir-test0004".to_string(),
                    "sir-test0005".to_string()
                ],
            }
        );
    }

    // This is the only test that installs the process-wide logger, and the only one that runs
    // the usage path, so the usage line count below isn't disturbed by other tests.
    #[tokio::test]
    async fn run_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = logging::init(LevelFilter::Info, dir.path()).unwrap();

        let requester = StubRequester::new(&["sir-abc123"]);
        assert_eq!(launch(None, &requester).await.unwrap(), Outcome::Usage);
        assert!(requester.requests().is_empty());

        launch(Some(&test_template("minimal.json")), &requester)
            .await
            .unwrap();
        log::logger().flush();

        let log = fs::read_to_string(&log_path).unwrap();
        // Every line is "[<local timestamp>] <LEVEL padded to 8> <message>".
        for line in log.lines() {
            let (stamp, rest) = line.split_once("] ").unwrap();
            assert!(stamp.starts_with('['));
            assert!(NaiveDateTime::parse_from_str(&stamp[1..], "%Y-%m-%d %H:%M:%S,%3f").is_ok());
            assert_eq!(rest.as_bytes()[8], b' ');
        }

        let usage_lines: Vec<_> = log.lines().filter(|line| line.contains(USAGE)).collect();
        assert_eq!(usage_lines.len(), 1);
        assert!(usage_lines[0].ends_with(&format!("] ERROR    {}", USAGE)));
        let request_line = "] INFO     Spot Request done! Spot Request Id: sir-abc123";
        assert!(log.lines().any(|line| line.ends_with(request_line)));
    }
}
