use std::fmt;
use std::str::FromStr;

use crate::error::ProjectionError;

/// Lifecycle state of a projection, persisted as a lowercase string in the
/// registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionStatus {
    Idle,
    Running,
    Stopping,
    Deleting,
    DeletingInclEmittedEvents,
    Resetting,
}

impl ProjectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionStatus::Idle => "idle",
            ProjectionStatus::Running => "running",
            ProjectionStatus::Stopping => "stopping",
            ProjectionStatus::Deleting => "deleting",
            ProjectionStatus::DeletingInclEmittedEvents => "deleting_incl_emitted_events",
            ProjectionStatus::Resetting => "resetting",
        }
    }
}

impl fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectionStatus {
    type Err = ProjectionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(ProjectionStatus::Idle),
            "running" => Ok(ProjectionStatus::Running),
            "stopping" => Ok(ProjectionStatus::Stopping),
            "deleting" => Ok(ProjectionStatus::Deleting),
            "deleting_incl_emitted_events" => Ok(ProjectionStatus::DeletingInclEmittedEvents),
            "resetting" => Ok(ProjectionStatus::Resetting),
            other => Err(ProjectionError::InvalidArgument(format!(
                "unknown projection status {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for status in [
            ProjectionStatus::Idle,
            ProjectionStatus::Running,
            ProjectionStatus::Stopping,
            ProjectionStatus::Deleting,
            ProjectionStatus::DeletingInclEmittedEvents,
            ProjectionStatus::Resetting,
        ] {
            assert_eq!(status.as_str().parse::<ProjectionStatus>().unwrap(), status);
        }

        assert!("bogus".parse::<ProjectionStatus>().is_err());
    }
}
