// Tue Jan 13 2026 - Alex

use crate::datasource::{DatasourceError, DatasourceSession, SessionFactory};
use std::ops::Deref;

/// Checked-out session that is handed back to its factory on drop.
pub struct SessionGuard<'a> {
    factory: &'a dyn SessionFactory,
    session: Option<Box<dyn DatasourceSession>>,
}

impl<'a> SessionGuard<'a> {
    pub fn open(factory: &'a dyn SessionFactory) -> Result<Self, DatasourceError> {
        let session = factory.open()?;
        Ok(Self {
            factory,
            session: Some(session),
        })
    }
}

impl Deref for SessionGuard<'_> {
    type Target = dyn DatasourceSession;

    fn deref(&self) -> &Self::Target {
        match self.session.as_deref() {
            Some(session) => session,
            None => unreachable!("session released before guard drop"),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.factory.close(session);
        }
    }
}
