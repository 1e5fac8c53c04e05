/// A platform workspace. `domain` is computed once at construction, not
/// recomputed per access (ground: `original_source/types/user.go`
/// `NewUser`).
#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub domain: String,
}

impl Workspace {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        let name = name.into();
        let domain = format!("{name}.lineblocs.com");
        Self { id, name, domain }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub token: String,
    pub workspace: Workspace,
}

impl User {
    pub fn new(id: i64, workspace_id: i64, workspace_name: impl Into<String>) -> Self {
        Self {
            id,
            token: String::new(),
            workspace: Workspace::new(workspace_id, workspace_name),
        }
    }
}
