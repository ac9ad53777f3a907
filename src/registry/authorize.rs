//! Authorization filter in front of the registry transport.
//!
//! The policy engine itself is external; this layer only asks it before
//! letting a call through.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::registry::{FileHandoff, PolicySet, RegistrationRecord, RegistryError, RegistryTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Unregister,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Unregister => "unregister",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a registry call may proceed. `Err` carries the reason.
pub trait PolicyEvaluator: Send + Sync + 'static {
    fn evaluate(&self, policies: &PolicySet, operation: Operation, record: &RegistrationRecord) -> Result<(), String>;
}

/// Allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAll;

impl PolicyEvaluator for PermitAll {
    fn evaluate(&self, _: &PolicySet, _: Operation, _: &RegistrationRecord) -> Result<(), String> {
        Ok(())
    }
}

pub struct Authorize {
    policies: PolicySet,
    evaluator: Arc<dyn PolicyEvaluator>,
    inner: Arc<dyn RegistryTransport>,
}

impl Authorize {
    pub fn new(policies: PolicySet, evaluator: Arc<dyn PolicyEvaluator>, inner: Arc<dyn RegistryTransport>) -> Self {
        Self {
            policies,
            evaluator,
            inner,
        }
    }

    fn check(&self, operation: Operation, record: &RegistrationRecord) -> Result<(), RegistryError> {
        self.evaluator
            .evaluate(&self.policies, operation, record)
            .map_err(|reason| {
                tracing::warn!(operation = %operation, name = %record.name, reason = %reason, "Registry call denied by policy");
                RegistryError::Denied { operation, reason }
            })
    }
}

#[async_trait]
impl RegistryTransport for Authorize {
    async fn register(&self, record: RegistrationRecord) -> Result<RegistrationRecord, RegistryError> {
        self.check(Operation::Register, &record)?;
        self.inner.register(record).await
    }

    async fn unregister(&self, record: RegistrationRecord) -> Result<(), RegistryError> {
        self.check(Operation::Unregister, &record)?;
        self.inner.unregister(record).await
    }

    fn file_handoff(&self) -> Option<&dyn FileHandoff> {
        self.inner.file_handoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryRegistry, RegistrationSpec};

    struct DenyRegister;

    impl PolicyEvaluator for DenyRegister {
        fn evaluate(&self, policies: &PolicySet, operation: Operation, _: &RegistrationRecord) -> Result<(), String> {
            match operation {
                Operation::Register => Err(format!("denied by {}", policies.sources().join(","))),
                Operation::Unregister => Ok(()),
            }
        }
    }

    fn record() -> RegistrationRecord {
        RegistrationRecord::from_spec(&RegistrationSpec {
            name: "fw1".to_string(),
            service_name: "firewall".to_string(),
            url: "tcp://127.0.0.1:5000".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_denied_call_never_reaches_transport() {
        let registry = Arc::new(InMemoryRegistry::new());
        let authorize = Authorize::new(PolicySet::new(["a.rego"]), Arc::new(DenyRegister), registry.clone());

        let err = authorize.register(record()).await.unwrap_err();
        match err {
            RegistryError::Denied { operation, reason } => {
                assert_eq!(operation, Operation::Register);
                assert_eq!(reason, "denied by a.rego");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(registry.is_empty());

        authorize.unregister(record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_permit_all() {
        let registry = Arc::new(InMemoryRegistry::new());
        let authorize = Authorize::new(PolicySet::default(), Arc::new(PermitAll), registry.clone());

        authorize.register(record()).await.unwrap();
        assert_eq!(registry.len(), 1);
    }
}
