//! Job identity, kinds, lifecycle states and input roles.

use std::fmt;

use serde::Serialize;

/// Job ids are unique within a [`JobKind`], never across kinds.
pub type JobId = u64;

/// The two job families served side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Image-to-image registration. Ids are pre-registered in the admission ledger.
    Registration,
    /// Point-set transformation. Ids are assigned by the server on arrival.
    Transform,
}

impl JobKind {
    /// Name of the kind's root directory under the jobs data location.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Registration => "elastix",
            Self::Transform => "transformix",
        }
    }

    /// `Content-Disposition` file name of the returned archive.
    pub fn result_file_name(self) -> &'static str {
        match self {
            Self::Registration => "registration_result.zip",
            Self::Transform => "transformix_result.zip",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration => f.write_str("registration"),
            Self::Transform => f.write_str("transform"),
        }
    }
}

/// Lifecycle of a single job.
///
/// `Queued` covers the span between id resolution and slot acquisition. For
/// kinds that pre-register their ids it starts with the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Admitted,
    Staging,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Rejected
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Admitted | Rejected) => true,
            (Admitted, Staging | Failed | TimedOut) => true,
            (Staging, Running | Failed | TimedOut) => true,
            (Running, Succeeded | Failed | TimedOut) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::Staging => "staging",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A file (or directory) a job owns inside its scratch directory.
///
/// Upload roles carry the multipart field name they are read from; the
/// on-disk name is always derived here and never taken from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRole {
    FixedImage,
    MovingImage,
    InitialTransform,
    /// Numbered registration parameter file, `0..numberOfTransforms`.
    TransformParam(usize),
    InputPoints,
    TransformFiles,
    /// Directory the external task writes its results into.
    Output,
    /// Archive built from [`InputRole::Output`].
    Archive,
}

/// Multipart field carrying the number of `transformParam_<i>` parts.
pub const NUMBER_OF_TRANSFORMS_FIELD: &str = "numberOfTransforms";

/// Query parameter carrying the job id.
pub const JOB_ID_FIELD: &str = "id";

impl InputRole {
    /// Multipart field name the role is uploaded under, if it is an upload.
    pub fn field_name(self) -> Option<String> {
        match self {
            Self::FixedImage => Some("fixedImage".into()),
            Self::MovingImage => Some("movingImage".into()),
            Self::InitialTransform => Some("initialTransform".into()),
            Self::TransformParam(i) => Some(format!("transformParam_{i}")),
            Self::InputPoints => Some("InputPts".into()),
            Self::TransformFiles => Some("transformFiles".into()),
            Self::Output | Self::Archive => None,
        }
    }

    /// Upload role read from the multipart field `name`.
    ///
    /// Numbered fields must use the canonical spelling (`transformParam_3`,
    /// not `transformParam_03`) so every role has exactly one field name.
    pub fn from_field_name(name: &str) -> Option<Self> {
        let role = match name {
            "fixedImage" => Self::FixedImage,
            "movingImage" => Self::MovingImage,
            "initialTransform" => Self::InitialTransform,
            "InputPts" => Self::InputPoints,
            "transformFiles" => Self::TransformFiles,
            _ => {
                let index = name.strip_prefix("transformParam_")?;
                if !index.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let role = Self::TransformParam(index.parse().ok()?);
                return (role.field_name().as_deref() == Some(name)).then_some(role);
            }
        };
        Some(role)
    }

    /// Whether jobs of `kind` take this role as an upload.
    pub fn is_upload_for(self, kind: JobKind) -> bool {
        match kind {
            JobKind::Registration => matches!(
                self,
                Self::FixedImage | Self::MovingImage | Self::InitialTransform | Self::TransformParam(_)
            ),
            JobKind::Transform => matches!(self, Self::InputPoints | Self::TransformFiles),
        }
    }

    /// Server-side file name (without extension) inside the job directory.
    pub fn file_stem(self) -> String {
        match self {
            Self::FixedImage => "fixed".into(),
            Self::MovingImage => "moving".into(),
            Self::InitialTransform => "initial_transform".into(),
            Self::TransformParam(i) => format!("transform_{i}"),
            Self::InputPoints => "pts".into(),
            Self::TransformFiles => "transforms".into(),
            Self::Output => "output".into(),
            Self::Archive => "res.zip".into(),
        }
    }
}

/// What happens to a job's scratch directory once the response is handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScratchPolicy {
    /// Keep inputs and outputs on disk for later inspection.
    Retain,
    /// Remove the whole job directory, on success and failure alike.
    Erase,
}
