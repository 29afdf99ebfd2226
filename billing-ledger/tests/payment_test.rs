//! Payment integration tests for billing-ledger.

mod common;

use billing_ledger::models::{InvoiceStatus, PaymentMethod, RecordPayment, UpsertLineItem};
use common::{test_day, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::ErrorKind;
use uuid::Uuid;

fn payment(amount: Decimal) -> RecordPayment {
    RecordPayment {
        amount,
        method: PaymentMethod::Pix,
        reference: Some("E0000000020240304".to_string()),
        paid_on: test_day(),
    }
}

async fn sent_invoice(app: &TestApp<billing_ledger::services::MemoryStore>) -> Uuid {
    let id = app.draft_invoice().await.invoice_id;
    app.ledger
        .upsert_line_item(
            &app.ctx,
            id,
            &UpsertLineItem::new("Honorários", dec!(1), dec!(1000)).with_tax(dec!(50)),
        )
        .await
        .expect("Failed to add line item");
    app.ledger
        .send_invoice(&app.ctx, id)
        .await
        .expect("Failed to send invoice");
    id
}

#[tokio::test]
async fn payments_move_invoice_to_partial_then_paid() {
    let app = TestApp::spawn().await;
    let id = sent_invoice(&app).await;

    let (invoice, first) = app
        .ledger
        .record_payment(&app.ctx, id, &payment(dec!(400)))
        .await
        .expect("Failed to record payment");
    assert_eq!(invoice.invoice_status, InvoiceStatus::PartialPaid);
    assert_eq!(invoice.amount_paid, dec!(400));
    assert_eq!(invoice.amount_due(), dec!(650));
    assert_eq!(first.method, PaymentMethod::Pix);

    let (invoice, _) = app
        .ledger
        .record_payment(&app.ctx, id, &payment(dec!(650)))
        .await
        .expect("Failed to record payment");
    assert_eq!(invoice.invoice_status, InvoiceStatus::Paid);
    assert_eq!(invoice.amount_due(), dec!(0));

    let payments = app.ledger.list_payments(&app.ctx, id).await.unwrap();
    assert_eq!(payments.len(), 2);
    let total: Decimal = payments.iter().map(|p| p.amount).sum();
    assert_eq!(total, dec!(1050));

    let err = app
        .ledger
        .record_payment(&app.ctx, id, &payment(dec!(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableState);
}

#[tokio::test]
async fn overpayment_is_rejected_without_side_effects() {
    let app = TestApp::spawn().await;
    let id = sent_invoice(&app).await;

    let err = app
        .ledger
        .record_payment(&app.ctx, id, &payment(dec!(1050.01)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = app
        .ledger
        .record_payment(&app.ctx, id, &payment(dec!(0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let invoice = app.ledger.get_invoice(&app.ctx, id).await.unwrap();
    assert_eq!(invoice.invoice_status, InvoiceStatus::Sent);
    assert_eq!(invoice.amount_paid, dec!(0));
    assert!(app.ledger.list_payments(&app.ctx, id).await.unwrap().is_empty());
}

#[tokio::test]
async fn draft_invoice_does_not_accept_payments() {
    let app = TestApp::spawn().await;
    let id = app.draft_invoice().await.invoice_id;

    let err = app
        .ledger
        .record_payment(&app.ctx, id, &payment(dec!(10)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableState);
}

#[tokio::test]
async fn paid_invoice_cannot_be_cancelled() {
    let app = TestApp::spawn().await;
    let id = sent_invoice(&app).await;
    app.ledger
        .record_payment(&app.ctx, id, &payment(dec!(1050)))
        .await
        .expect("Failed to record payment");

    let err = app.ledger.cancel_invoice(&app.ctx, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableState);
}
