use serde::{Deserialize, Serialize};
use std::fmt;

/// Retention tier. Daily archives are the originals; weekly and monthly
/// archives are copies made on qualifying calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }

    /// Directory name under the backup root
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }

    /// Filename prefix: `backup-` for daily, `backup-<tier>-` otherwise
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Tier::Daily => "backup-",
            Tier::Weekly => "backup-weekly-",
            Tier::Monthly => "backup-monthly-",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
