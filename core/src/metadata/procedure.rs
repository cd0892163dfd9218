use std::fmt;
use std::sync::{Arc, RwLock};

use common::ident::Identifier;
use common::node::NodeKind;
use common::value::Value;

use crate::engine::children::{ChildNode, Children};
use crate::engine::loader::{MetadataLoader, ScopedTransaction};
use crate::engine::lock::{Lockable, ReferenceLock};
use crate::engine::subject::Subject;
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::parameter::Parameter;
use crate::metadata::privilege::{group_privileges, PrivilegeGroup, PrivilegeRow};
use crate::metadata::visitor::MetadataVisitor;
use crate::metadata::{LoaderLink, MetadataNode, NodeRef};

const OWNER_SQL: &str = "select rdb$owner_name from rdb$procedures where rdb$procedure_name = ?";

const SOURCE_SQL: &str =
    "select rdb$procedure_source from rdb$procedures where rdb$procedure_name = ?";

const DESCRIPTION_SQL: &str =
    "select rdb$description from rdb$procedures where rdb$procedure_name = ?";

const PRIVILEGES_SQL: &str = "select RDB$USER, RDB$USER_TYPE, RDB$GRANTOR, RDB$PRIVILEGE, \
     RDB$GRANT_OPTION, RDB$FIELD_NAME from RDB$USER_PRIVILEGES \
     where RDB$RELATION_NAME = ? and rdb$object_type = 5 \
     order by rdb$user, rdb$user_type, rdb$privilege";

/// Parameter query; default source and mechanism only exist from ODS 11.1.
fn parameters_sql(loader: &MetadataLoader) -> String {
    let optional = if loader.version_at_least(11, 1) {
        "p.rdb$default_source, p.rdb$parameter_mechanism "
    } else {
        "null, -1 "
    };
    format!(
        "select p.rdb$parameter_name, p.rdb$field_source, p.rdb$parameter_type, {optional}\
         from rdb$procedure_parameters p where p.rdb$PROCEDURE_name = ? \
         order by p.rdb$parameter_type, p.rdb$PARAMETER_number"
    )
}

/// A stored procedure and its lazily loaded parameters.
pub struct Procedure {
    subject: Subject,
    link: LoaderLink,
    parameters: Children<Parameter>,
    description: RwLock<Option<Option<String>>>,
}

impl Procedure {
    pub fn new(name: Identifier, link: LoaderLink) -> Self {
        Self {
            subject: Subject::new(NodeKind::Procedure, name),
            link,
            parameters: Children::new(),
            description: RwLock::new(None),
        }
    }

    fn name_value(&self) -> Value {
        Value::from(&self.subject.name())
    }

    /// Parameters in catalog order: inputs first, then outputs, each by
    /// position.
    pub fn parameters(&self) -> CatalogResult<Vec<Arc<Parameter>>> {
        let loader = self.link.get()?;
        let name = self.name_value();
        self.parameters.ensure_loaded(self, &loader, |loader| {
            let sql = parameters_sql(loader);
            let rows = loader.statement(&sql)?.execute(&[name])?;
            Ok(rows.iter().map(Parameter::from_row).collect())
        })
    }

    /// Refetches the parameters even when they are loaded.
    pub fn reload_parameters(&self) -> CatalogResult<bool> {
        let loader = self.link.get()?;
        let name = self.name_value();
        let summary = self.parameters.load(self, &loader, |loader| {
            let sql = parameters_sql(loader);
            let rows = loader.statement(&sql)?.execute(&[name])?;
            Ok(rows.iter().map(Parameter::from_row).collect())
        })?;
        Ok(summary.changed)
    }

    pub fn parameters_loaded(&self) -> bool {
        self.parameters.is_loaded()
    }

    pub fn invalidate(&self) {
        self.parameters.invalidate();
    }

    pub fn input_parameters(&self) -> CatalogResult<Vec<Arc<Parameter>>> {
        Ok(self
            .parameters()?
            .into_iter()
            .filter(|parameter| !parameter.is_output())
            .collect())
    }

    pub fn output_parameters(&self) -> CatalogResult<Vec<Arc<Parameter>>> {
        Ok(self
            .parameters()?
            .into_iter()
            .filter(|parameter| parameter.is_output())
            .collect())
    }

    pub fn parameter_count(&self) -> CatalogResult<usize> {
        Ok(self.parameters()?.len())
    }

    /// Looks a parameter up among those already loaded.
    pub fn find_parameter(&self, name: &str) -> Option<Arc<Parameter>> {
        self.parameters.find(name)
    }

    /// Runs `read` in a transaction while this procedure is pinned.
    fn with_catalog<T>(
        &self,
        read: impl FnOnce(&MetadataLoader) -> CatalogResult<T>,
    ) -> CatalogResult<T> {
        let loader = self.link.get()?;
        let transaction = ScopedTransaction::begin(&loader)?;
        let _lock = ReferenceLock::new(self);
        read(transaction.loader())
    }

    pub fn owner(&self) -> CatalogResult<Identifier> {
        let name = self.name_value();
        let what = format!("owner of procedure {}", self.subject.name());
        self.with_catalog(|loader| {
            let row = loader.statement(OWNER_SQL)?.fetch_one(&[name], &what)?;
            Ok(row.identifier(0))
        })
    }

    /// Procedure body with leading whitespace removed.
    pub fn source(&self) -> CatalogResult<String> {
        let name = self.name_value();
        let what = format!("source of procedure {}", self.subject.name());
        self.with_catalog(|loader| {
            let row = loader.statement(SOURCE_SQL)?.fetch_one(&[name], &what)?;
            Ok(row.text(0).trim_start().to_owned())
        })
    }

    /// Catalog description, read once and cached.
    pub fn description(&self) -> CatalogResult<Option<String>> {
        let cached = self
            .description
            .read()
            .map_err(|_| CatalogError::LockPoisoned("procedure description"))?
            .clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let name = self.name_value();
        let what = format!("description of procedure {}", self.subject.name());
        let fetched = self.with_catalog(|loader| {
            let row = loader.statement(DESCRIPTION_SQL)?.fetch_one(&[name], &what)?;
            Ok(match row.text(0) {
                "" => None,
                text => Some(text.to_owned()),
            })
        })?;
        self.store_description(fetched.clone())?;
        Ok(fetched)
    }

    /// Stores edited description text and notifies observers.
    pub fn set_description(&self, text: Option<String>) -> CatalogResult<()> {
        self.store_description(text.filter(|text| !text.is_empty()))?;
        self.subject.notify_observers();
        Ok(())
    }

    fn store_description(&self, text: Option<String>) -> CatalogResult<()> {
        *self
            .description
            .write()
            .map_err(|_| CatalogError::LockPoisoned("procedure description"))? = Some(text);
        Ok(())
    }

    /// Privileges granted on this procedure, one group per grantee.
    pub fn privileges(&self) -> CatalogResult<Vec<PrivilegeGroup>> {
        let name = self.name_value();
        self.with_catalog(|loader| {
            let rows = loader.statement(PRIVILEGES_SQL)?.execute(&[name])?;
            Ok(group_privileges(rows.iter().map(PrivilegeRow::from_row)))
        })
    }
}

impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        self.subject.name() == other.subject.name()
    }
}

impl Lockable for Procedure {
    fn subject(&self) -> &Subject {
        &self.subject
    }

    fn lock_children(&self) {
        self.parameters.lock_all();
    }

    fn unlock_children(&self) {
        self.parameters.unlock_all();
    }
}

impl ChildNode for Procedure {
    fn key(&self) -> Identifier {
        self.subject.name()
    }
}

impl MetadataNode for Procedure {
    fn loaded_children(&self) -> Vec<NodeRef> {
        self.parameters
            .snapshot()
            .into_iter()
            .map(NodeRef::Parameter)
            .collect()
    }

    fn children(&self) -> CatalogResult<Vec<NodeRef>> {
        Ok(self
            .parameters()?
            .into_iter()
            .map(NodeRef::Parameter)
            .collect())
    }

    fn accept(&self, visitor: &mut dyn MetadataVisitor) {
        visitor.visit_procedure(self);
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.subject.name())
            .field("parameters", &self.parameters)
            .finish()
    }
}
