use std::time::Duration;

use clap::Args;

use crate::models::{Role, Submitter};

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Base URL of the people service (enrollments, guardians)
    #[arg(long, env = "PEOPLE_SERVICE_URL", default_value = "http://localhost:8003")]
    pub people_service_url: String,

    /// Base URL of the academic service (thresholds, class assignments)
    #[arg(long, env = "ACADEMIC_SERVICE_URL", default_value = "http://localhost:8002")]
    pub academic_service_url: String,

    /// Time budget for each directory lookup
    #[arg(long, env = "LOOKUP_TIMEOUT_SECS", default_value_t = 5)]
    pub lookup_timeout_secs: u64,

    /// Upper bound on concurrent lookups and registrations in a batch
    #[arg(long, env = "BATCH_CONCURRENCY", default_value_t = crate::batch::DEFAULT_CONCURRENCY)]
    pub batch_concurrency: usize,
}

impl Settings {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs.max(1))
    }
}

/// Identity of the caller. Tokens are issued and verified by the identity
/// service; they are forwarded to the directories as-is.
#[derive(Args, Debug, Clone)]
pub struct SubmitterArgs {
    #[arg(long, env = "GRADES_USER_ID")]
    pub user_id: String,

    #[arg(long, env = "GRADES_ROLE", default_value = "teacher")]
    pub role: String,

    #[arg(long, env = "GRADES_AUTH_TOKEN", hide_env_values = true)]
    pub token: String,
}

impl SubmitterArgs {
    pub fn submitter(&self) -> Submitter {
        let role = self
            .role
            .parse::<Role>()
            .unwrap_or_else(|never| match never {});
        Submitter {
            user_id: self.user_id.clone(),
            role,
            token: self.token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: Settings,
        #[command(flatten)]
        submitter: SubmitterArgs,
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_given() {
        let harness = Harness::try_parse_from([
            "grade-alerts",
            "--database-url",
            "postgres://localhost/grades",
            "--user-id",
            "T1",
            "--token",
            "abc",
        ])
        .unwrap();

        assert_eq!(harness.settings.max_connections, 5);
        assert_eq!(harness.settings.people_service_url, "http://localhost:8003");
        assert_eq!(harness.settings.lookup_timeout(), Duration::from_secs(5));
        assert_eq!(harness.settings.batch_concurrency, 8);

        let submitter = harness.submitter.submitter();
        assert_eq!(submitter.role, Role::Teacher);
        assert_eq!(submitter.token, "abc");
    }

    #[test]
    fn zero_timeout_is_raised_to_one_second() {
        let harness = Harness::try_parse_from([
            "grade-alerts",
            "--database-url",
            "postgres://localhost/grades",
            "--lookup-timeout-secs",
            "0",
            "--user-id",
            "A9",
            "--role",
            "ADMIN",
            "--token",
            "abc",
        ])
        .unwrap();

        assert_eq!(harness.settings.lookup_timeout(), Duration::from_secs(1));
        assert_eq!(harness.submitter.submitter().role, Role::Admin);
    }
}
