//! `threadline grant`: write a project membership straight into the store.

use anyhow::Context;

use tl_domain::config::Config;
use tl_domain::entity::{ProjectMember, ProjectRole};
use tl_store::ConversationStore;

pub fn parse_role(raw: &str) -> Result<ProjectRole, String> {
    match raw.to_ascii_lowercase().as_str() {
        "owner" => Ok(ProjectRole::Owner),
        "admin" => Ok(ProjectRole::Admin),
        "member" => Ok(ProjectRole::Member),
        "viewer" => Ok(ProjectRole::Viewer),
        other => Err(format!("unknown role '{other}'")),
    }
}

pub async fn run(config: &Config, project: String, user: String, role: ProjectRole) -> anyhow::Result<()> {
    let store = crate::bootstrap::open_store(config)?;

    let mut tx = store.begin().await.context("starting transaction")?;
    tx.put_member(ProjectMember {
        project_id: project.clone(),
        user_id: user.clone(),
        role,
    })
    .await?;
    tx.commit().await.context("committing membership")?;
    store.flush().context("writing store snapshot")?;

    println!("{user} is now {role:?} in {project}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(parse_role("Viewer"), Ok(ProjectRole::Viewer));
        assert_eq!(parse_role("owner"), Ok(ProjectRole::Owner));
        assert!(parse_role("guest").is_err());
    }
}
