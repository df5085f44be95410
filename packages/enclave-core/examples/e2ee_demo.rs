//! # End-to-End Encryption Demo
//!
//! Two users provision keys against a shared in-memory directory, then
//! exchange a message and a file:
//! 1. Alice and Bob initialize their key pairs
//! 2. Alice encrypts a message for Bob; Bob decrypts it
//! 3. Alice encrypts a file for Bob; Bob decrypts it
//! 4. A tampered file is rejected
//!
//! ## Run
//!
//! ```bash
//! cargo run --example e2ee_demo
//! ```

use std::sync::Arc;

use enclave_core::directory::InMemoryDirectory;
use enclave_core::storage::MemoryStorage;
use enclave_core::{CoreConfig, EnclaveCore, Error, KeyProtection};

#[tokio::main]
async fn main() {
    println!("=================================================");
    println!("          ENCLAVE END-TO-END ENCRYPTION DEMO");
    println!("=================================================\n");

    let directory = Arc::new(InMemoryDirectory::new());
    let config = CoreConfig {
        rsa_key_bits: 2048,
        key_protection: KeyProtection::Passphrase,
        ..CoreConfig::default()
    };

    let alice = EnclaveCore::new(config.clone(), Arc::new(MemoryStorage::new()), directory.clone())
        .expect("Failed to create Alice's core");
    let bob = EnclaveCore::new(config, Arc::new(MemoryStorage::new()), directory.clone())
        .expect("Failed to create Bob's core");

    // =========================================================================
    // STEP 1: Provision keys
    // =========================================================================
    println!("1. Provisioning key pairs (2048-bit RSA for speed)...\n");

    alice.sign_in("alice").expect("sign in");
    bob.sign_in("bob").expect("sign in");

    alice
        .initialize_keys(Some("alice passphrase"))
        .await
        .expect("Failed to provision Alice");
    bob.initialize_keys(Some("bob passphrase"))
        .await
        .expect("Failed to provision Bob");

    println!("   Published keys in directory: {}", directory.len());
    println!();

    // =========================================================================
    // STEP 2: Message
    // =========================================================================
    println!("2. Alice sends Bob an encrypted message...\n");

    let ciphertext = alice
        .encrypt_message_for("bob", "Meet at the usual place at 7.")
        .await
        .expect("Failed to encrypt message");
    println!("   Ciphertext: {}...", &ciphertext[..48]);

    let plaintext = bob
        .decrypt_message(&ciphertext, Some("bob passphrase"))
        .await
        .expect("Failed to decrypt message");
    println!("   Bob reads: {}", plaintext);
    println!();

    // =========================================================================
    // STEP 3: File
    // =========================================================================
    println!("3. Alice sends Bob an encrypted file...\n");

    let content = b"name,amount\nrent,1200\nfood,400\n".to_vec();
    let package = alice
        .encrypt_file_for("bob", content.clone(), "budget.csv", "text/csv")
        .await
        .expect("Failed to encrypt file");

    println!("   Ciphertext bytes: {}", package.ciphertext.len());
    println!(
        "   Metadata: {}",
        package.metadata.to_json().expect("metadata JSON")
    );

    let file = bob
        .decrypt_file(
            package.ciphertext.clone(),
            package.metadata.clone(),
            Some("bob passphrase"),
        )
        .await
        .expect("Failed to decrypt file");
    assert_eq!(&*file.bytes, &content);
    println!("   Bob restored {} ({}, {} bytes)", file.name, file.mime_type, file.bytes.len());
    println!();

    // =========================================================================
    // STEP 4: Tampering
    // =========================================================================
    println!("4. Flipping one ciphertext bit in transit...\n");

    let mut tampered = package.ciphertext;
    tampered[0] ^= 0x01;
    match bob
        .decrypt_file(tampered, package.metadata, Some("bob passphrase"))
        .await
    {
        Err(Error::IntegrityCheckFailed) => println!("   Rejected: integrity check failed"),
        other => panic!("tampering went unnoticed: {:?}", other.map(|f| f.name)),
    }

    println!("\n=================================================");
    println!("                    DONE");
    println!("=================================================");
}
