//! Tenant isolation integration tests for billing-ledger.

mod common;

use billing_ledger::models::{
    CreateInvoice, CreateVendor, InvoiceType, PaymentMethod, RecordPayment, UpdateTimeEntry,
    UpsertLineItem,
};
use common::{at, case_work, company_client, test_day, TestApp};
use rust_decimal_macros::dec;
use service_core::error::ErrorKind;

#[tokio::test]
async fn foreign_invoice_is_neither_readable_nor_writable() {
    let app = TestApp::spawn().await;
    let intruder = app.other_tenant().await;

    let invoice = app.draft_invoice().await;
    let id = invoice.invoice_id;
    app.ledger
        .upsert_line_item(&app.ctx, id, &UpsertLineItem::new("A", dec!(1), dec!(100)))
        .await
        .expect("Failed to add line item");

    let err = app.ledger.get_invoice(&intruder, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);
    assert_eq!(err.status_code().as_u16(), 403);

    let err = app
        .ledger
        .upsert_line_item(&intruder, id, &UpsertLineItem::new("B", dec!(1), dec!(999)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let err = app
        .ledger
        .set_invoice_discount(&intruder, id, dec!(100))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let err = app.ledger.list_line_items(&intruder, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let items = app.ledger.list_line_items(&app.ctx, id).await.unwrap();
    let err = app
        .ledger
        .delete_line_item(&intruder, items[0].line_item_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let err = app.ledger.delete_invoice(&intruder, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    app.ledger.send_invoice(&app.ctx, id).await.unwrap();
    let err = app
        .ledger
        .record_payment(
            &intruder,
            id,
            &RecordPayment {
                amount: dec!(10),
                method: PaymentMethod::BankTransfer,
                reference: None,
                paid_on: test_day(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    // The owner's view is untouched.
    let owned = app.ledger.get_invoice(&app.ctx, id).await.unwrap();
    assert_eq!(owned.total_amount, dec!(100));
    assert_eq!(owned.amount_paid, dec!(0));
}

#[tokio::test]
async fn foreign_time_entry_is_neither_readable_nor_writable() {
    let app = TestApp::spawn().await;
    let intruder = app.other_tenant().await;

    let entry = app
        .ledger
        .record_time_entry(&app.ctx, &case_work(app.ctx.user_id, at(9, 0), at(10, 0)))
        .await
        .expect("Failed to record entry");

    let err = app
        .ledger
        .get_time_entry(&intruder, entry.time_entry_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let err = app
        .ledger
        .update_time_entry(
            &intruder,
            entry.time_entry_id,
            &UpdateTimeEntry {
                is_billable: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let err = app
        .ledger
        .delete_time_entry(&intruder, entry.time_entry_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    // Summaries are looked up within the caller's tenant only.
    let summary = app
        .ledger
        .get_daily_summary(&intruder, app.ctx.user_id, test_day())
        .await
        .unwrap();
    assert!(summary.is_none());
}

#[tokio::test]
async fn invoice_for_foreign_client_is_rejected() {
    let app = TestApp::spawn().await;
    let intruder = app.other_tenant().await;

    let err = app
        .ledger
        .create_invoice(
            &intruder,
            &CreateInvoice::new(app.client_id, InvoiceType::Standard),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);

    let err = app.ledger.get_client(&intruder, app.client_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrossTenantAccess);
}

#[tokio::test]
async fn same_identifiers_may_exist_in_different_tenants() {
    let app = TestApp::spawn().await;
    let other = app.other_tenant().await;

    let vendor = CreateVendor {
        name: "Papelaria Central".to_string(),
        cnpj: "19131243000197".to_string(),
    };
    app.ledger
        .create_vendor(&app.ctx, &vendor)
        .await
        .expect("Failed to create vendor");
    app.ledger
        .create_vendor(&other, &vendor)
        .await
        .expect("Vendor CNPJ is unique per tenant only");

    let err = app.ledger.create_vendor(&app.ctx, &vendor).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    app.ledger
        .create_client(&other, &company_client())
        .await
        .expect("Client may exist in both tenants");
}

#[tokio::test]
async fn disabled_firm_keeps_reads_but_rejects_writes() {
    let app = TestApp::spawn().await;
    let invoice = app.draft_invoice().await;
    app.ledger
        .upsert_line_item(
            &app.ctx,
            invoice.invoice_id,
            &UpsertLineItem::new("Parecer", dec!(1), dec!(100)),
        )
        .await
        .expect("Failed to add line item");
    let item_id = app
        .ledger
        .list_line_items(&app.ctx, invoice.invoice_id)
        .await
        .expect("Failed to list line items")[0]
        .line_item_id;

    let sent = app.draft_invoice().await;
    app.ledger
        .upsert_line_item(
            &app.ctx,
            sent.invoice_id,
            &UpsertLineItem::new("Audiência", dec!(1), dec!(200)),
        )
        .await
        .expect("Failed to add line item");
    app.ledger
        .send_invoice(&app.ctx, sent.invoice_id)
        .await
        .expect("Failed to send invoice");

    let firm = app
        .ledger
        .disable_law_firm(&app.ctx)
        .await
        .expect("Failed to disable firm");
    assert!(!firm.is_active);

    app.ledger
        .get_invoice(&app.ctx, invoice.invoice_id)
        .await
        .expect("Reads must keep working");

    let err = app
        .ledger
        .record_time_entry(&app.ctx, &case_work(app.ctx.user_id, at(9, 0), at(10, 0)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableState);

    let err = app
        .ledger
        .create_invoice(&app.ctx, &CreateInvoice::new(app.client_id, InvoiceType::Standard))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableState);

    let id = invoice.invoice_id;
    let ledger = &app.ledger;
    let ctx = &app.ctx;
    let outcomes = [
        (
            "upsert_line_item",
            ledger
                .upsert_line_item(ctx, id, &UpsertLineItem::new("Extra", dec!(1), dec!(50)))
                .await
                .map(|_| ()),
        ),
        ("delete_line_item", ledger.delete_line_item(ctx, item_id).await.map(|_| ())),
        ("set_invoice_discount", ledger.set_invoice_discount(ctx, id, dec!(10)).await.map(|_| ())),
        ("send_invoice", ledger.send_invoice(ctx, id).await.map(|_| ())),
        ("recompute_invoice_totals", ledger.recompute_invoice_totals(ctx, id).await.map(|_| ())),
        ("cancel_invoice", ledger.cancel_invoice(ctx, id).await.map(|_| ())),
        ("delete_invoice", ledger.delete_invoice(ctx, id).await),
        (
            "record_payment",
            ledger
                .record_payment(
                    ctx,
                    sent.invoice_id,
                    &RecordPayment {
                        amount: dec!(50),
                        method: PaymentMethod::BankTransfer,
                        reference: None,
                        paid_on: test_day(),
                    },
                )
                .await
                .map(|_| ()),
        ),
    ];
    for (operation, outcome) in outcomes {
        let err = outcome.expect_err(operation);
        assert_eq!(err.kind(), ErrorKind::ImmutableState, "{}", operation);
    }

    // Nothing changed underneath.
    let unchanged = ledger.get_invoice(ctx, id).await.expect("Invoice must survive");
    assert_eq!(unchanged.total_amount, dec!(100));
    assert_eq!(unchanged.discount_amount, dec!(0));
    let still_sent = ledger.get_invoice(ctx, sent.invoice_id).await.unwrap();
    assert_eq!(still_sent.amount_paid, dec!(0));
}
