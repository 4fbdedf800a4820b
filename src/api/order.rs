use serde::{Deserialize, Serialize};

use crate::api;

/// Status of an [`Order`], see [RFC 8555 §7.1.6].
///
/// ```text
/// pending -> ready -> processing -> valid
///    \         \          \
///     `---------`----------`-----> invalid
/// ```
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// A certificate order ([RFC 8555 §7.1.3]).
///
/// Sent with only `identifiers` set to create the order; every other field comes from the CA.
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    pub identifiers: Vec<api::Identifier>,

    /// Why the order became invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<api::Problem>,

    /// One authorization URL per identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizations: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finalize: String,

    /// Download URL, once the order is valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl Order {
    pub(crate) fn from_identifiers(identifiers: Vec<api::Identifier>) -> Self {
        Self {
            identifiers,
            ..Default::default()
        }
    }

    /// Domains of the order, in the order they were requested.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    pub fn is_status_pending(&self) -> bool {
        self.status == Some(OrderStatus::Pending)
    }

    pub fn is_status_ready(&self) -> bool {
        self.status == Some(OrderStatus::Ready)
    }

    pub fn is_status_valid(&self) -> bool {
        self.status == Some(OrderStatus::Valid)
    }

    pub fn is_status_invalid(&self) -> bool {
        self.status == Some(OrderStatus::Invalid)
    }

    /// Takes the server's view of the order, keeping the requested identifier order.
    ///
    /// CAs may list identifiers in another order, which would change the certificate's common
    /// name. A response naming other identifiers is an error.
    pub(crate) fn overwrite(&mut self, mut from_api: Self) -> eyre::Result<()> {
        let same_identifiers = from_api.identifiers.len() == self.identifiers.len()
            && from_api
                .identifiers
                .iter()
                .all(|id| self.identifiers.contains(id));

        eyre::ensure!(
            same_identifiers,
            "order identifiers changed: requested {:?}, CA returned {:?}",
            self.domains(),
            from_api.domains()
        );

        from_api.identifiers = std::mem::take(&mut self.identifiers);
        *self = from_api;
        Ok(())
    }
}
