//! Rendering of nginx and systemd configuration
//!
//! Pure functions: the same inputs always produce byte-identical text.

use std::path::Path;

use crate::models::project::Project;

/// Settings baked into a gunicorn unit that do not come from the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOptions {
    pub workers: u32,
    pub wsgi_app: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl Default for UnitOptions {
    fn default() -> Self {
        Self {
            workers: 3,
            wsgi_app: "config.wsgi:application".to_string(),
            user: None,
            group: Some("www-data".to_string()),
        }
    }
}

/// nginx virtual host proxying the project's domain to its gunicorn port
pub fn render_reverse_proxy_config(project: &Project, static_root: &Path) -> String {
    let static_dir = static_root.join(&project.domain).join("static");

    format!(
        r#"server {{
    listen 80;
    server_name {domain};

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }}

    location /static/ {{
        alias {static_dir}/;
    }}
}}
"#,
        domain = project.domain,
        port = project.port,
        static_dir = static_dir.display(),
    )
}

/// systemd unit running gunicorn from the project's virtualenv
pub fn render_service_unit(
    project: &Project,
    venv_bin: &Path,
    project_root: &Path,
    options: &UnitOptions,
) -> String {
    let mut service = String::new();
    if let Some(user) = &options.user {
        service.push_str(&format!("User={user}\n"));
    }
    if let Some(group) = &options.group {
        service.push_str(&format!("Group={group}\n"));
    }
    service.push_str(&format!("WorkingDirectory={}\n", project_root.display()));
    for (key, value) in project.env_pairs() {
        service.push_str(&format!("Environment=\"{}\"\n", escape_unit_value(&format!("{key}={value}"))));
    }
    service.push_str(&format!(
        "ExecStart={} --workers {} --bind 127.0.0.1:{} {}\n",
        venv_bin.join("gunicorn").display(),
        options.workers,
        project.port,
        options.wsgi_app,
    ));
    service.push_str("Restart=always\n");

    format!(
        "[Unit]\n\
         Description=Gunicorn daemon for {name}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         {service}\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = project.name,
    )
}

/// Escape a value for a double-quoted systemd assignment
fn escape_unit_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '%' => escaped.push_str("%%"),
            '$' => escaped.push_str("$$"),
            '\n' | '\r' => escaped.push(' '),
            c => escaped.push(c),
        }
    }
    escaped
}
