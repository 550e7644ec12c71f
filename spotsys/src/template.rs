//! The template module owns reading spot request templates and preparing them for submission.
//!
//! A template is a JSON object holding `RequestSpotInstances` parameters with their EC2 API
//! names.  It's kept as a plain JSON value until the startup script is injected, so injection
//! touches exactly one field, and only then converted into a typed `SpotRequest`.

use crate::aws::spot::request::SpotRequest;
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::path::Path;

pub(crate) const LAUNCH_SPECIFICATION: &str = "LaunchSpecification";
pub(crate) const USER_DATA: &str = "UserData";

/// Reads the template at the given path, which must hold a JSON object.
pub(crate) fn load<P>(path: P) -> Result<Value>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let template_str = fs::read_to_string(path).context(error::ReadTemplateSnafu { path })?;
    let template: Value =
        serde_json::from_str(&template_str).context(error::ParseTemplateSnafu { path })?;
    ensure!(template.is_object(), error::TemplateNotObjectSnafu { path });
    Ok(template)
}

/// Sets `LaunchSpecification.UserData` to the given value.  `UserData` is created if it isn't
/// there yet, but `LaunchSpecification` must already exist and be an object.
pub(crate) fn inject_user_data(template: &mut Value, user_data: String) -> Result<()> {
    launch_specification(template)?.insert(USER_DATA.to_string(), Value::String(user_data));
    Ok(())
}

fn launch_specification(template: &mut Value) -> Result<&mut Map<String, Value>> {
    template
        .get_mut(LAUNCH_SPECIFICATION)
        .context(error::MissingFieldSnafu {
            field: LAUNCH_SPECIFICATION,
        })?
        .as_object_mut()
        .context(error::FieldNotObjectSnafu {
            field: LAUNCH_SPECIFICATION,
        })
}

/// Converts a prepared template into a typed spot request.
pub(crate) fn to_request(template: Value) -> Result<SpotRequest> {
    serde_json::from_value(template).context(error::InvalidRequestSnafu)
}

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Template is missing required field '{}'", field))]
        MissingField { field: String },

        #[snafu(display("Template field '{}' must be an object", field))]
        FieldNotObject { field: String },

        #[snafu(display("Template is not a valid spot request: {}", source))]
        InvalidRequest { source: serde_json::Error },

        #[snafu(display("Invalid JSON in template '{}': {}", path.display(), source))]
        ParseTemplate {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("Failed to read template '{}': {}", path.display(), source))]
        ReadTemplate {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Template '{}' must be a JSON object", path.display()))]
        TemplateNotObject { path: PathBuf },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{inject_user_data, load, to_request, Error, LAUNCH_SPECIFICATION, USER_DATA};
    use crate::user_data;
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};

    fn test_template(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("test_templates")
            .join(name)
    }

    #[test]
    fn inject_null_user_data() {
        let mut template = json!({"LaunchSpecification": {"UserData": null}});
        inject_user_data(&mut template, user_data::encoded()).unwrap();
        assert_eq!(
            template,
            json!({"LaunchSpecification": {"UserData": user_data::encoded()}})
        );
    }

    #[test]
    fn inject_leaves_other_fields() {
        let mut template = load(test_template("sample.json")).unwrap();
        let mut expected = template.clone();
        inject_user_data(&mut template, "dGVzdA==".to_string()).unwrap();

        expected[LAUNCH_SPECIFICATION][USER_DATA] = Value::String("dGVzdA==".to_string());
        assert_eq!(template, expected);
    }

    #[test]
    fn inject_creates_user_data() {
        let mut template = json!({
            "SpotPrice": "0.05",
            "LaunchSpecification": {"ImageId": "ami-50be8446"}
        });
        inject_user_data(&mut template, "dGVzdA==".to_string()).unwrap();
        assert_eq!(
            template,
            json!({
                "SpotPrice": "0.05",
                "LaunchSpecification": {"ImageId": "ami-50be8446", "UserData": "dGVzdA=="}
            })
        );
    }

    #[test]
    fn inject_missing_launch_specification() {
        let mut template = json!({});
        let err = inject_user_data(&mut template, user_data::encoded()).unwrap_err();
        assert!(matches!(err, Error::MissingField { .. }));
        assert_eq!(template, json!({}));
    }

    #[test]
    fn inject_launch_specification_not_object() {
        let mut template = json!({"LaunchSpecification": "ami-50be8446"});
        let err = inject_user_data(&mut template, user_data::encoded()).unwrap_err();
        assert!(matches!(err, Error::FieldNotObject { .. }));
    }

    #[test]
    fn load_errors() {
        assert!(matches!(
            load(test_template("does-not-exist.json")).unwrap_err(),
            Error::ReadTemplate { .. }
        ));
        assert!(matches!(
            load(test_template("malformed.json")).unwrap_err(),
            Error::ParseTemplate { .. }
        ));
        assert!(matches!(
            load(test_template("array.json")).unwrap_err(),
            Error::TemplateNotObject { .. }
        ));
    }

    #[test]
    fn sample_converts() {
        let mut template = load(test_template("sample.json")).unwrap();
        inject_user_data(&mut template, user_data::encoded()).unwrap();
        let request = to_request(template).unwrap();

        assert_eq!(request.spot_price.as_deref(), Some("0.10"));
        assert_eq!(request.instance_count, Some(1));
        assert_eq!(request.block_duration_minutes, Some(60));
        let spec = request.launch_specification.unwrap();
        assert_eq!(spec.image_id.as_deref(), Some("ami-50be8446"));
        assert_eq!(spec.instance_type.as_deref(), Some("c4.2xlarge"));
        assert_eq!(spec.user_data, Some(user_data::encoded()));
        assert_eq!(
            spec.security_groups,
            Some(vec!["generic_security_group".to_string()])
        );
        let mappings = spec.block_device_mappings.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].ebs.as_ref().unwrap().volume_size, Some(30));
    }

    #[test]
    fn unknown_field_rejected() {
        let template = json!({"LaunchSpecification": {"ImageID": "ami-50be8446"}});
        assert!(matches!(
            to_request(template).unwrap_err(),
            Error::InvalidRequest { .. }
        ));
    }

    #[test]
    fn shipped_template_converts() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("templates")
            .join("spot-template.json");
        let mut template = load(path).unwrap();
        inject_user_data(&mut template, user_data::encoded()).unwrap();
        let request = to_request(template).unwrap();

        assert_eq!(request.request_type.as_deref(), Some("one-time"));
        assert_eq!(request.spot_price.as_deref(), Some("0.10"));
        let spec = request.launch_specification.unwrap();
        assert_eq!(spec.user_data, Some(user_data::encoded()));
        assert_eq!(spec.key_name.as_deref(), Some("BRTeamKey"));
        let tag_specs = request.tag_specifications.unwrap();
        assert_eq!(
            tag_specs[0].resource_type.as_deref(),
            Some("spot-instances-request")
        );
        let tags = tag_specs[0].tags.as_ref().unwrap();
        assert_eq!(tags[0].key.as_deref(), Some("Project"));
        assert_eq!(tags[0].value.as_deref(), Some("mo802"));
    }
}
