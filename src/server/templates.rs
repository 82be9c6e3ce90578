//! Template rendering using minijinja with embedded templates.

use minijinja::{Environment, Error as JinjaError, ErrorKind};
use rust_embed::Embed;
use serde::Serialize;

use crate::registry::Share;

/// Embedded HTML templates.
#[derive(Embed)]
#[folder = "templates/"]
pub struct Templates;

/// Renders the pages served over HTTP.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with embedded templates.
    pub fn new() -> Result<Self, JinjaError> {
        let mut env = Environment::new();

        for file in Templates::iter() {
            let filename = file.to_string();
            if let Some(content) = Templates::get(&filename) {
                let template_str = std::str::from_utf8(content.data.as_ref())
                    .map_err(|_| JinjaError::from(ErrorKind::InvalidOperation))?;
                env.add_template_owned(filename, template_str.to_string())?;
            }
        }

        Ok(Self { env })
    }

    /// Render the share index page.
    pub fn render_index(&self, shares: &[Share]) -> Result<String, JinjaError> {
        let template = self.env.get_template("index.html")?;
        let views: Vec<ShareView> = shares.iter().map(ShareView::from_share).collect();
        template.render(minijinja::context! { shares => views })
    }
}

/// What the index page shows of a share. Paths stay on the server.
#[derive(Debug, Clone, Serialize)]
pub struct ShareView {
    pub name: String,
}

impl ShareView {
    pub fn from_share(share: &Share) -> Self {
        Self {
            name: share.name.clone(),
        }
    }
}
