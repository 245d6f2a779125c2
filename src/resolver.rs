//! Turning session names into email addresses.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{error::ConfigError, session::SessionStore};

/// Something that may know the email address of a session.
pub trait AddressResolver: Send + Sync {
    /// The address for `name`, or `None` if this resolver doesn't know it.
    fn address_for_session(&self, name: &str, authenticated: bool) -> Option<String>;
}

/// Accepts session names that already are email addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecifiedResolver;

impl AddressResolver for SpecifiedResolver {
    fn address_for_session(&self, name: &str, _authenticated: bool) -> Option<String> {
        let addresses = mailparse::addrparse(name).ok()?;

        match addresses.first()? {
            mailparse::MailAddr::Single(single) if single.addr.contains('@') => {
                Some(single.addr.clone())
            }
            _ => None,
        }
    }
}

/// Looks up the address stored for the session.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn SessionStore>,
}

impl SessionResolver {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

impl fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResolver").finish_non_exhaustive()
    }
}

impl AddressResolver for SessionResolver {
    fn address_for_session(&self, name: &str, authenticated: bool) -> Option<String> {
        self.store.email(name, authenticated)
    }
}

/// Appends a fixed domain to authenticated user names.
#[derive(Debug, Clone)]
pub struct DefaultDomainResolver {
    domain: Option<String>,
}

impl DefaultDomainResolver {
    #[must_use]
    pub fn new(domain: Option<String>) -> Self {
        Self {
            domain: domain.filter(|domain| !domain.is_empty()),
        }
    }
}

impl AddressResolver for DefaultDomainResolver {
    fn address_for_session(&self, name: &str, authenticated: bool) -> Option<String> {
        let domain = self.domain.as_deref()?;

        (authenticated && !name.contains('@') && !name.contains(char::is_whitespace))
            .then(|| format!("{name}@{domain}"))
    }
}

/// Resolvers available by name, for `email_address_resolvers`.
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn AddressResolver>>,
}

impl ResolverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resolver` as `name`, replacing any earlier one.
    pub fn register(&mut self, name: impl Into<String>, resolver: Arc<dyn AddressResolver>) {
        self.resolvers.insert(name.into(), resolver);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }

    /// Build the chain for the names in `order`.
    ///
    /// # Errors
    ///
    /// Returns an error if a name has no registered resolver.
    pub fn chain<S: AsRef<str>>(&self, order: &[S]) -> Result<ResolverChain, ConfigError> {
        order
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.resolvers
                    .get(name)
                    .map(|resolver| (name.to_string(), Arc::clone(resolver)))
                    .ok_or_else(|| ConfigError::UnknownResolver(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|resolvers| ResolverChain { resolvers })
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.resolvers.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &names)
            .finish()
    }
}

/// Resolvers in the order they are consulted.
#[derive(Default, Clone)]
pub struct ResolverChain {
    resolvers: Vec<(String, Arc<dyn AddressResolver>)>,
}

impl ResolverChain {
    /// The first address any resolver produces, with the name of that resolver.
    #[must_use]
    pub fn resolve(&self, name: &str, authenticated: bool) -> Option<(String, &str)> {
        self.resolvers.iter().find_map(|(resolver_name, resolver)| {
            resolver
                .address_for_session(name, authenticated)
                .filter(|address| !address.is_empty())
                .map(|address| (address, resolver_name.as_str()))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resolvers.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
