//! Lending races against the PostgreSQL record store
//!
//! Needs `DATABASE_URL` pointing at a scratch database; the migrations are
//! applied on first connect. Without it every test returns early.
//! Borrower ids are derived from freshly inserted book ids so the tests can
//! share one database and run in parallel.

use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool};

use circulation_server::{
    config::LendingConfig,
    error::{AppError, LendingError},
    models::{LoanStatus, NewLoan},
    repository::{LendingTransaction, PgStore, RecordStore, Repository, TxMode},
    services::{lending::LendingService, settings::SettingsService},
};

async fn database() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(32)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

async fn add_book(pool: &PgPool, title: &str, total_copies: i32) -> i32 {
    sqlx::query_scalar("INSERT INTO books (title, total_copies) VALUES ($1, $2) RETURNING id")
        .bind(title)
        .bind(total_copies)
        .fetch_one(pool)
        .await
        .expect("Failed to insert book")
}

fn lending(pool: &PgPool) -> LendingService {
    LendingService::new(Repository::postgres(pool.clone()), LendingConfig::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_grant_every_copy() {
    const COPIES: i32 = 3;
    const ATTEMPTS: i32 = 20;

    let Some(pool) = database().await else { return };
    let service = lending(&pool);

    for round in 0..5 {
        let book = add_book(&pool, &format!("Les Rougon-Macquart {}", round), COPIES).await;

        let handles: Vec<_> = (0..ATTEMPTS)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move { service.borrow(book, book * 1000 + i).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(AppError::Lending(LendingError::Unavailable(_))) => {}
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }

        assert_eq!(granted, COPIES, "round {}", round);
        assert_eq!(service.availability(book).await.unwrap().available_copies, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_borrows() {
    let Some(pool) = database().await else { return };
    let service = lending(&pool);
    let book = add_book(&pool, "La Curée", 5).await;
    let borrower = book * 1000;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.borrow(book, borrower).await })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(AppError::Lending(LendingError::DuplicateActiveLoan(_))) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(service.borrower_loans(borrower, true).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_respect_member_limit() {
    let Some(pool) = database().await else { return };
    let service = lending(&pool);
    let max = SettingsService::new(Repository::postgres(pool.clone()), LendingConfig::default())
        .get_settings()
        .await
        .unwrap()
        .max_active_loans;

    let mut books = Vec::new();
    for i in 0..max + 3 {
        books.push(add_book(&pool, &format!("L'Assommoir, tome {}", i), 1).await);
    }
    let borrower = books[0] * 1000 + 999;

    let handles: Vec<_> = books
        .iter()
        .map(|&book| {
            let service = service.clone();
            tokio::spawn(async move { service.borrow(book, borrower).await })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(AppError::Lending(LendingError::LimitExceeded(_))) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }

    assert_eq!(granted, max);
    assert_eq!(service.borrower_loans(borrower, true).await.unwrap().len(), max as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_on_one_loan() {
    let Some(pool) = database().await else { return };
    let service = lending(&pool);
    let book = add_book(&pool, "Au Bonheur des Dames", 1).await;
    let loan_id = service.borrow(book, book * 1000).await.unwrap().id;

    let handles: Vec<_> = (0..4)
        .map(|staff| {
            let service = service.clone();
            tokio::spawn(async move { service.check_out(loan_id, 900 + staff).await })
        })
        .collect();
    let mut checked_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => checked_out += 1,
            Err(AppError::Lending(LendingError::InvalidTransition(_))) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(checked_out, 1);

    let handles: Vec<_> = (0..4)
        .map(|staff| {
            let service = service.clone();
            tokio::spawn(async move { service.return_loan(loan_id, 900 + staff).await })
        })
        .collect();
    let mut returned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => returned += 1,
            Err(AppError::Lending(LendingError::InvalidTransition(_))) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(returned, 1);

    let stored = service.get_loan(loan_id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Returned);
    assert!(stored.checked_out_at.is_some());
    assert!(stored.returned_at.is_some());
}

#[tokio::test]
async fn test_store_queries() {
    let Some(pool) = database().await else { return };
    let service = lending(&pool);
    let book = add_book(&pool, "Germinal", 2).await;
    let borrower = book * 1000;

    let loan = service.borrow(book, borrower).await.unwrap();
    let availability = service.availability(book).await.unwrap();
    assert_eq!(availability.active_loans, 1);
    assert_eq!(availability.available_copies, 1);

    let loan = service.check_out(loan.id, 900).await.unwrap();
    assert_eq!(loan.status, LoanStatus::CheckedOut);
    assert!(loan.expected_return_at.is_some());

    let history = service.borrower_loans(borrower, false).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, loan.id);
    assert!(!history[0].is_overdue);

    service.return_loan(loan.id, 900).await.unwrap();
    assert!(service.borrower_loans(borrower, true).await.unwrap().is_empty());
    assert_eq!(service.availability(book).await.unwrap().available_copies, 2);
}

#[tokio::test]
async fn test_storage_errors_are_classified() {
    let Some(pool) = database().await else { return };
    let store = PgStore::new(pool.clone());
    let book = add_book(&pool, "Nana", 3).await;
    let new_loan = || NewLoan {
        book_id: book,
        borrower_id: book * 1000,
        requested_at: Utc::now(),
    };

    // a second active loan for the pair hits the partial unique index
    let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
    tx.insert_loan(new_loan()).await.unwrap();
    let err = tx.insert_loan(new_loan()).await.unwrap_err();
    assert!(matches!(err, AppError::TransactionConflict(_)), "{:?}", err);
    drop(tx);

    // any other unique violation is a storage failure
    let err = sqlx::query("INSERT INTO books (id, title, total_copies) VALUES ($1, 'Nana', 1)")
        .bind(book)
        .execute(&pool)
        .await
        .unwrap_err();
    assert!(matches!(AppError::from(err), AppError::Database(_)));

    // returned without a return time breaks a CHECK constraint
    let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
    let mut loan = tx.insert_loan(new_loan()).await.unwrap();
    loan.status = LoanStatus::Returned;
    let err = tx.update_loan(&loan).await.unwrap_err();
    assert!(matches!(err, AppError::Database(_)), "{:?}", err);
    drop(tx);

    // nothing above was committed
    assert!(lending(&pool).borrower_loans(book * 1000, false).await.unwrap().is_empty());
}
