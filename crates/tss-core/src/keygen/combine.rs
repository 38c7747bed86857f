//! Keychain combination
//!
//! Turns the Y-shares a party received during generation into its durable
//! signing material, after checking that the party's own view of the
//! common keychain matches the one the relay reported.

use super::transport::{self, ExchangeableShare};
use crate::eddsa::{self, CombinedKey, KeyShare, YShare};
use crate::messaging::{MessagingKey, MessagingPublicKey};
use crate::types::{CommonKeychain, EncryptedYShare, Party, ServerSigningMaterial, SigningMaterial};
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// An encrypted Y-share together with the keys needed to open it
pub struct DecryptableYShare<'a> {
    pub share: EncryptedYShare,
    pub recipient_key: &'a MessagingKey,
    pub sender_key: &'a MessagingPublicKey,
}

/// Decrypt received shares and route them by sender.
///
/// Every share must be addressed to `owner` and come from a distinct other
/// party.
pub fn decrypt_routed<T: ExchangeableShare>(
    owner: Party,
    received: &[DecryptableYShare<'_>],
) -> Result<BTreeMap<Party, T>> {
    let mut routed = BTreeMap::new();
    for entry in received {
        let share: T =
            transport::decrypt_and_verify(&entry.share, entry.recipient_key, entry.sender_key)?;
        if share.recipient() != owner {
            return Err(Error::InvalidShareIndex(share.recipient().index()));
        }
        let sender = share.sender();
        if sender == owner || routed.contains_key(&sender) {
            return Err(Error::InvalidShareIndex(sender.index()));
        }
        debug!(from = %sender, to = %owner, "Decrypted YShare");
        routed.insert(sender, share);
    }
    Ok(routed)
}

/// Combine a User or Backup key share with the shares received from the
/// other two parties
pub fn combine(
    local: &KeyShare,
    expected: &CommonKeychain,
    received: &[DecryptableYShare<'_>],
) -> Result<SigningMaterial> {
    let owner = local.u_share.i;
    let counterpart = owner
        .third(Party::Server)
        .ok_or_else(|| Error::InvalidConfig(format!("{} cannot combine as a signer", owner)))?;

    let mut routed: BTreeMap<Party, YShare> = decrypt_routed(owner, received)?;
    let server_y_share = routed
        .remove(&Party::Server)
        .ok_or(Error::InvalidShareIndex(Party::Server.index()))?;
    let counterpart_y_share = routed
        .remove(&counterpart)
        .ok_or(Error::InvalidShareIndex(counterpart.index()))?;

    let combined = eddsa::key_combine(&local.u_share, &[&server_y_share, &counterpart_y_share])?;
    check_common_keychain(&combined, expected)?;

    Ok(SigningMaterial {
        u_share: local.u_share.clone(),
        server_y_share,
        counterpart_y_share,
    })
}

/// Combine the Server key share with the User and Backup shares, returning
/// the common keychain the server reports back
pub fn combine_server(
    local: &KeyShare,
    received: &[DecryptableYShare<'_>],
) -> Result<(CommonKeychain, ServerSigningMaterial)> {
    if local.u_share.i != Party::Server {
        return Err(Error::InvalidConfig(format!(
            "{} cannot combine as the server",
            local.u_share.i
        )));
    }

    let mut routed: BTreeMap<Party, YShare> = decrypt_routed(Party::Server, received)?;
    let user_y_share = routed
        .remove(&Party::User)
        .ok_or(Error::InvalidShareIndex(Party::User.index()))?;
    let backup_y_share = routed
        .remove(&Party::Backup)
        .ok_or(Error::InvalidShareIndex(Party::Backup.index()))?;

    let combined = eddsa::key_combine(&local.u_share, &[&user_y_share, &backup_y_share])?;

    Ok((
        combined.common_keychain(),
        ServerSigningMaterial {
            u_share: local.u_share.clone(),
            user_y_share,
            backup_y_share,
        },
    ))
}

fn check_common_keychain(combined: &CombinedKey, expected: &CommonKeychain) -> Result<()> {
    if combined.common_keychain().matches(expected.as_str()) {
        Ok(())
    } else {
        Err(Error::Consistency("Common keychains do not match".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen::transport::encrypt;

    struct Setup {
        shares: BTreeMap<Party, KeyShare>,
        session: MessagingKey,
        service: MessagingKey,
    }

    fn setup() -> Setup {
        Setup {
            shares: Party::ALL
                .into_iter()
                .map(|party| (party, eddsa::key_share(party)))
                .collect(),
            session: MessagingKey::generate(),
            service: MessagingKey::generate(),
        }
    }

    fn expected(setup: &Setup) -> CommonKeychain {
        let server = &setup.shares[&Party::Server];
        let received = [
            &setup.shares[&Party::User].y_shares[&Party::Server],
            &setup.shares[&Party::Backup].y_shares[&Party::Server],
        ];
        eddsa::key_combine(&server.u_share, &received)
            .unwrap()
            .common_keychain()
    }

    fn received_by<'a>(
        setup: &'a Setup,
        party: Party,
        service_public: &'a MessagingPublicKey,
        session_public: &'a MessagingPublicKey,
    ) -> Vec<DecryptableYShare<'a>> {
        let counterpart = party.third(Party::Server).unwrap();
        let server = &setup.shares[&Party::Server];
        vec![
            DecryptableYShare {
                share: encrypt(server, party.index(), session_public, &setup.service).unwrap(),
                recipient_key: &setup.session,
                sender_key: service_public,
            },
            DecryptableYShare {
                share: encrypt(
                    &setup.shares[&counterpart],
                    party.index(),
                    session_public,
                    &setup.session,
                )
                .unwrap(),
                recipient_key: &setup.session,
                sender_key: session_public,
            },
        ]
    }

    #[test]
    fn test_all_parties_agree() {
        let setup = setup();
        let service_public = setup.service.public_key();
        let session_public = setup.session.public_key();
        let expected = expected(&setup);

        for party in [Party::User, Party::Backup] {
            let received = received_by(&setup, party, &service_public, &session_public);
            let material = combine(&setup.shares[&party], &expected, &received).unwrap();
            assert_eq!(material.party(), party);
            assert_eq!(material.server_y_share.j, Party::Server);
            material.validate().unwrap();
        }

        let server_received: Vec<DecryptableYShare> = [Party::User, Party::Backup]
            .iter()
            .map(|party| DecryptableYShare {
                share: encrypt(&setup.shares[party], 3, &service_public, &setup.session).unwrap(),
                recipient_key: &setup.service,
                sender_key: &session_public,
            })
            .collect();
        let (server_keychain, _) =
            combine_server(&setup.shares[&Party::Server], &server_received).unwrap();
        assert_eq!(server_keychain, expected);
    }

    #[test]
    fn test_wrong_expected_keychain() {
        let setup = setup();
        let service_public = setup.service.public_key();
        let session_public = setup.session.public_key();
        let wrong = CommonKeychain::new(
            &curve25519_dalek::constants::ED25519_BASEPOINT_POINT,
            &[1u8; 32],
        );

        let received = received_by(&setup, Party::User, &service_public, &session_public);
        let result = combine(&setup.shares[&Party::User], &wrong, &received);
        assert!(matches!(result, Err(Error::Consistency(_))));
    }

    #[test]
    fn test_missing_server_share() {
        let setup = setup();
        let service_public = setup.service.public_key();
        let session_public = setup.session.public_key();

        let mut received = received_by(&setup, Party::Backup, &service_public, &session_public);
        received.remove(0);
        let result = combine(&setup.shares[&Party::Backup], &expected(&setup), &received);
        assert!(matches!(result, Err(Error::InvalidShareIndex(3))));
    }

    #[test]
    fn test_share_for_another_party() {
        let setup = setup();
        let service_public = setup.service.public_key();
        let session_public = setup.session.public_key();

        // Shares addressed to Backup handed to User
        let received = received_by(&setup, Party::Backup, &service_public, &session_public);
        let result = combine(&setup.shares[&Party::User], &expected(&setup), &received);
        assert!(matches!(result, Err(Error::InvalidShareIndex(2))));
    }
}
