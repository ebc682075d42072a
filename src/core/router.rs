//! Static route table: public path pattern and method to logical service.
use std::collections::HashMap as StdHashMap;

use http::Method;
use thiserror::Error;

use crate::config::models::RouteConfig;

#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("invalid route '{path}': {reason}")]
    InvalidPattern { path: String, reason: String },

    #[error("invalid method '{method}' on route '{path}'")]
    InvalidMethod { path: String, method: String },

    #[error("route '{path}' is declared more than once for method {method}")]
    Overlap { path: String, method: String },
}

/// Where a matched request goes.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub pattern: String,
    pub service: String,
    pub rate_limited: bool,
    /// Empty means any method.
    pub methods: Vec<Method>,
}

impl RouteTarget {
    fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found(&'a RouteTarget),
    MethodNotAllowed,
    NotFound,
}

pub struct RouteTable {
    router: matchit::Router<Vec<RouteTarget>>,
    len: usize,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, RouteTableError> {
        // Several entries may share a path with different methods; group them first,
        // keeping declaration order.
        let mut order: Vec<String> = Vec::new();
        let mut grouped: StdHashMap<String, Vec<RouteTarget>> = StdHashMap::new();

        for route in routes {
            let methods = route
                .methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                        RouteTableError::InvalidMethod {
                            path: route.path.clone(),
                            method: m.clone(),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let target = RouteTarget {
                pattern: route.path.clone(),
                service: route.service.clone(),
                rate_limited: route.rate_limited,
                methods,
            };

            let group = grouped.entry(route.path.clone()).or_insert_with(|| {
                order.push(route.path.clone());
                Vec::new()
            });
            Self::check_overlap(group, &target)?;
            group.push(target);
        }

        let mut router = matchit::Router::new();
        for path in order {
            let targets = grouped.remove(&path).unwrap_or_default();
            router
                .insert(path.clone(), targets)
                .map_err(|e| RouteTableError::InvalidPattern {
                    path,
                    reason: e.to_string(),
                })?;
        }

        Ok(Self {
            router,
            len: routes.len(),
        })
    }

    fn check_overlap(existing: &[RouteTarget], new: &RouteTarget) -> Result<(), RouteTableError> {
        for other in existing {
            let clash = if other.methods.is_empty() || new.methods.is_empty() {
                Some("*".to_string())
            } else {
                new.methods
                    .iter()
                    .find(|m| other.methods.contains(m))
                    .map(ToString::to_string)
            };
            if let Some(method) = clash {
                return Err(RouteTableError::Overlap {
                    path: new.pattern.clone(),
                    method,
                });
            }
        }
        Ok(())
    }

    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        match self.router.at(path) {
            Ok(matched) => matched
                .value
                .iter()
                .find(|target| target.accepts(method))
                .map_or(RouteMatch::MethodNotAllowed, RouteMatch::Found),
            Err(_) => RouteMatch::NotFound,
        }
    }

    /// Number of configured route entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
