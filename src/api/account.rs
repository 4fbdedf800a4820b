use serde::{Deserialize, Serialize};

/// An ACME account ([RFC 8555 §7.1.2]).
///
/// Also the body of newAccount requests, which is why every field is optional.
///
/// [RFC 8555 §7.1.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.2
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AccountStatus>,

    /// `mailto:` URLs the CA may use to reach the account holder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,

    /// Request only: look up the account for the signing key instead of creating one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_return_existing: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

impl Account {
    pub fn is_status_valid(&self) -> bool {
        self.status == Some(AccountStatus::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_request_carries_only_the_flag() {
        let lookup = Account {
            only_return_existing: Some(true),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_string(&lookup).unwrap(),
            r#"{"onlyReturnExisting":true}"#
        );
    }
}
