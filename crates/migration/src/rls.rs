//! SQL for row-level security and value-list constraints

/// Statement a policy applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCommand {
    Select,
    Insert,
    Update,
    Delete,
    All,
}

impl PolicyCommand {
    fn as_sql(&self) -> &'static str {
        match self {
            PolicyCommand::Select => "SELECT",
            PolicyCommand::Insert => "INSERT",
            PolicyCommand::Update => "UPDATE",
            PolicyCommand::Delete => "DELETE",
            PolicyCommand::All => "ALL",
        }
    }
}

/// Database role a policy is granted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRole {
    /// Everyone, anonymous visitors included
    Public,
    Authenticated,
    Anon,
}

impl PolicyRole {
    fn as_sql(&self) -> &'static str {
        match self {
            PolicyRole::Public => "public",
            PolicyRole::Authenticated => "authenticated",
            PolicyRole::Anon => "anon",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RlsPolicy {
    pub name: &'static str,
    pub schema: &'static str,
    pub table: &'static str,
    pub command: PolicyCommand,
    pub role: PolicyRole,
    pub using: Option<String>,
    pub check: Option<String>,
}

impl RlsPolicy {
    pub fn new(name: &'static str, table: &'static str, command: PolicyCommand, role: PolicyRole) -> Self {
        Self {
            name,
            schema: "public",
            table,
            command,
            role,
            using: None,
            check: None,
        }
    }

    /// Policies on provider tables such as `storage.objects`.
    pub fn in_schema(mut self, schema: &'static str) -> Self {
        self.schema = schema;
        self
    }

    pub fn using(mut self, expr: impl Into<String>) -> Self {
        self.using = Some(expr.into());
        self
    }

    pub fn with_check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    pub fn create_sql(&self) -> String {
        let mut sql = format!(
            "CREATE POLICY \"{}\" ON {}.{} FOR {} TO {}",
            self.name,
            self.schema,
            self.table,
            self.command.as_sql(),
            self.role.as_sql()
        );
        if let Some(using) = &self.using {
            sql.push_str(&format!(" USING ({})", using));
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" WITH CHECK ({})", check));
        }
        sql.push(';');
        sql
    }

    pub fn drop_sql(&self) -> String {
        format!(
            "DROP POLICY IF EXISTS \"{}\" ON {}.{};",
            self.name, self.schema, self.table
        )
    }
}

pub fn enable_rls_sql(table: &str) -> String {
    format!("ALTER TABLE public.{} ENABLE ROW LEVEL SECURITY;", table)
}

/// `CHECK (column IN (...))` over a fixed list of labels.
pub fn check_in_sql(table: &str, column: &str, values: &[&str]) -> String {
    let list = values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "ALTER TABLE public.{table} ADD CONSTRAINT {table}_{column}_check CHECK ({column} IN ({list}));"
    )
}

/// Foreign key from `column` to the provider's user table.
pub fn references_auth_user_sql(table: &str, column: &str, on_delete: &str) -> String {
    format!(
        "ALTER TABLE public.{table} ADD CONSTRAINT {table}_{column}_fkey \
         FOREIGN KEY ({column}) REFERENCES auth.users(id) ON DELETE {on_delete};"
    )
}
